//! Request and response types, one pair per protocol method.

use http::StatusCode;
use serde::{Deserialize, Serialize, Serializer};

use crate::header::HeaderInfo;
use crate::id::B3Id;
use crate::metadata::{ResourceMetadata, ResourceProperties};
use crate::method::{Method, MethodSet};
use crate::range::Range;

fn status_code<S: Serializer>(status: &StatusCode, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u16(status.as_u16())
}

fn hex_bytes<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(data))
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadRequest {
    pub path: String,
    /// Unix seconds; 304 when the resource was not modified after this.
    #[serde(default)]
    pub if_modified_since: Option<i64>,
    /// 304 when the current ETag equals this.
    #[serde(default)]
    pub if_none_match: Option<B3Id>,
}

impl HeadRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocateRequest {
    pub head: HeadRequest,
    /// Chunk-index range.
    #[serde(default)]
    pub range_chunks: Range,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetRequest {
    pub head: HeadRequest,
    /// Byte range.
    #[serde(default)]
    pub range_bytes: Range,
}

/// Chunk content destined for a given index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRegistration {
    pub data: Vec<u8>,
    pub chunk_index: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutRequest {
    pub head: HeadRequest,
    #[serde(default)]
    pub properties: ResourceProperties,
    /// Replacement header; the current reference is kept when absent.
    #[serde(default)]
    pub header: Option<HeaderInfo>,
    /// Chunks, written at indices `0..data.len()`.
    pub data: Vec<Vec<u8>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchRequest {
    pub head: HeadRequest,
    pub data: Vec<DataRegistration>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefineRequest {
    pub head: HeadRequest,
    pub header: HeaderInfo,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "UPPERCASE")]
pub enum Request {
    Options { path: String },
    Head(HeadRequest),
    Locate(LocateRequest),
    Get(GetRequest),
    Post(HeadRequest),
    Put(PutRequest),
    Patch(PatchRequest),
    Delete(HeadRequest),
    Define(DefineRequest),
}

impl Request {
    pub fn method(&self) -> Method {
        match self {
            Request::Options { .. } => Method::Options,
            Request::Head(_) => Method::Head,
            Request::Locate(_) => Method::Locate,
            Request::Get(_) => Method::Get,
            Request::Post(_) => Method::Post,
            Request::Put(_) => Method::Put,
            Request::Patch(_) => Method::Patch,
            Request::Delete(_) => Method::Delete,
            Request::Define(_) => Method::Define,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Request::Options { path } => path,
            Request::Head(head) | Request::Post(head) | Request::Delete(head) => &head.path,
            Request::Locate(req) => &req.head.path,
            Request::Get(req) => &req.head.path,
            Request::Put(req) => &req.head.path,
            Request::Patch(req) => &req.head.path,
            Request::Define(req) => &req.head.path,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OptionsResponse {
    #[serde(serialize_with = "status_code")]
    pub status: StatusCode,
    pub allow: MethodSet,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HeadResponse {
    #[serde(serialize_with = "status_code")]
    pub status: StatusCode,
    pub header: HeaderInfo,
    pub metadata: ResourceMetadata,
    pub etag: B3Id,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LocateResponse {
    pub head: HeadResponse,
    pub data_points: Vec<B3Id>,
    /// Chunk range actually returned.
    pub range: Option<Range>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GetResponse {
    pub head: HeadResponse,
    #[serde(serialize_with = "hex_bytes")]
    pub data: Vec<u8>,
    /// Byte range actually returned.
    pub bytes_range: Option<Range>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DefineResponse {
    pub head: HeadResponse,
    pub header_address: B3Id,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "method", rename_all = "UPPERCASE")]
pub enum Response {
    Options(OptionsResponse),
    Head(HeadResponse),
    Locate(LocateResponse),
    Get(GetResponse),
    Put(LocateResponse),
    Patch(LocateResponse),
    Delete(HeadResponse),
    Define(DefineResponse),
}

impl Response {
    pub fn status(&self) -> StatusCode {
        match self {
            Response::Options(res) => res.status,
            Response::Head(res) | Response::Delete(res) => res.status,
            Response::Locate(res) | Response::Put(res) | Response::Patch(res) => res.head.status,
            Response::Get(res) => res.head.status,
            Response::Define(res) => res.head.status,
        }
    }
}
