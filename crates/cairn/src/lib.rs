//! Cairn - HTTP-semantics resources over content-addressed chunk storage.
//!
//! A [`Site`] combines three layers that share one SQLite database:
//!
//! - [`PermissionRegistry`]: roles, membership and per-resource admin roles.
//! - [`ResourceStore`]: deduplicated headers, resource metadata and ordered
//!   chunk references, with chunk bytes held by a [`BlobRegistry`].
//! - [`Dispatcher`]: OPTIONS, HEAD, GET, LOCATE, PUT, PATCH, DELETE and
//!   DEFINE requests mapped onto status codes.
//!
//! Network transport is left to the host; each call into a [`Site`] is one
//! atomic invocation made by an already identified [`Principal`].

pub mod config;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod etag;
pub mod events;
pub mod header;
pub mod id;
pub mod messages;
pub mod metadata;
pub mod method;
pub mod permissions;
pub mod range;
pub mod registry;
pub mod role;
pub mod site;
pub mod store;

pub use config::Config;
pub use db::SiteDb;
pub use dispatcher::Dispatcher;
pub use error::{Error, ErrorResponse};
pub use etag::compute_etag;
pub use events::Event;
pub use header::{
    CacheControl, CachePreset, CorsPolicy, CorsPreset, HeaderError, HeaderInfo, Redirect,
};
pub use id::B3Id;
pub use messages::{
    DataRegistration, DefineRequest, DefineResponse, GetRequest, GetResponse, HeadRequest,
    HeadResponse, LocateRequest, LocateResponse, OptionsResponse, PatchRequest, PutRequest,
    Request, Response,
};
pub use metadata::{ChunkRef, ResourceMetadata, ResourceProperties, ResourceState};
pub use method::{Method, MethodSet};
pub use permissions::{AdminRole, PermissionRegistry};
pub use range::{Range, RangeError, normalize_range};
pub use registry::{
    BlobRegistry, FsRegistry, MemoryRegistry, Payee, RegistryError, RoyaltyLedger,
};
pub use role::{Principal, Role};
pub use site::Site;
pub use store::{MetadataUpdate, ResourceStore};
