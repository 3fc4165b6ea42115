//! Credential plumbing for the LeafBridge gateway.
//!
//! The gateway never holds a long-lived device key. Each leaf device's
//! symmetric key is derived on demand by the edge security daemon's
//! workload API, reached over a Unix socket or TCP, and turned into
//! short-lived shared access signature tokens for the cloud channel.
//!
//! # Modules
//!
//! - [`http`]: HTTP/1.1 request serialization and incremental response parsing
//! - [`transport`]: scheme-selected workload transport (`unix://`, `http(s)://`)
//! - [`workload`]: the `sign` operation and the [`CredentialProvider`] seam
//! - [`sas`]: shared access signature tokens

pub mod error;
pub mod http;
pub mod sas;
pub mod transport;
pub mod workload;

pub use error::{SasError, SignError, TransportError};
pub use http::{HttpRequest, HttpResponse, ResponseParser};
pub use sas::{device_resource_uri, device_sas_token, generate_sas_token};
pub use transport::{Endpoint, WorkloadTransport};
pub use workload::{CredentialProvider, WorkloadSigner, SIGN_ALGORITHM};
