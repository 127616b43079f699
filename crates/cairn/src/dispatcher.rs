//! Protocol dispatcher.
//!
//! Every request walks the same gates before its method-specific work:
//! allowed-methods mask (405), authorization (403), then existence (404/410)
//! for methods that need a resource. Reads then resolve redirects and
//! conditional headers; writes check immutability (409) before mutating.

use http::StatusCode;
use tracing::debug;

use crate::error::Error;
use crate::etag::compute_etag;
use crate::events::Event;
use crate::header::HeaderInfo;
use crate::id::B3Id;
use crate::messages::{
    DataRegistration, DefineRequest, DefineResponse, GetRequest, GetResponse, HeadRequest,
    HeadResponse, LocateRequest, LocateResponse, OptionsResponse, PatchRequest, PutRequest,
    Request, Response,
};
use crate::metadata::ResourceState;
use crate::method::Method;
use crate::permissions::PermissionRegistry;
use crate::range::{Range, normalize_range};
use crate::registry::BlobRegistry;
use crate::role::Principal;
use crate::store::{MetadataUpdate, ResourceStore};

pub struct Dispatcher<'a, R: BlobRegistry + ?Sized> {
    permissions: PermissionRegistry<'a>,
    store: ResourceStore<'a, R>,
    principal: &'a Principal,
    journal: Vec<Event>,
}

impl<'a, R: BlobRegistry + ?Sized> Dispatcher<'a, R> {
    pub fn new(
        permissions: PermissionRegistry<'a>,
        store: ResourceStore<'a, R>,
        principal: &'a Principal,
    ) -> Self {
        Self {
            permissions,
            store,
            principal,
            journal: Vec::new(),
        }
    }

    /// Notifications staged so far; only meaningful once the invocation commits.
    pub fn into_events(self) -> Vec<Event> {
        self.journal
    }

    pub fn handle(&mut self, request: Request) -> Result<Response, Error> {
        let method = request.method();
        let path = request.path().to_string();
        debug!(%method, path = path.as_str(), principal = %self.principal, "Dispatching");

        let response = match request {
            Request::Options { path } => self.options(&path).map(Response::Options),
            Request::Head(req) => self.head(&req, Method::Head).map(Response::Head),
            Request::Locate(req) => self.locate(&req).map(Response::Locate),
            Request::Get(req) => self.get(&req).map(Response::Get),
            Request::Post(req) => self.post(&req),
            Request::Put(req) => self.put(req).map(Response::Put),
            Request::Patch(req) => self.patch(&req).map(Response::Patch),
            Request::Delete(req) => self.delete(&req).map(Response::Delete),
            Request::Define(req) => self.define(&req).map(Response::Define),
        }?;

        if method.is_mutating() {
            debug!(
                %method,
                path = path.as_str(),
                status = response.status().as_u16(),
                "Write staged"
            );
        }
        Ok(response)
    }

    // Gates

    fn check_method(&self, path: &str, method: Method, header: &HeaderInfo) -> Result<(), Error> {
        if header.cors.methods.contains(method) {
            return Ok(());
        }
        Err(Error::MethodNotAllowed {
            path: path.to_string(),
            method,
            allow: header.cors.methods,
            immutable: self.store.is_immutable(path)?,
        })
    }

    fn check_authorized(
        &self,
        path: &str,
        method: Method,
        header: &HeaderInfo,
    ) -> Result<(), Error> {
        if self
            .permissions
            .authorize(path, method, header, self.principal)?
        {
            return Ok(());
        }
        Err(Error::Forbidden {
            action: format!("{method} {path}"),
            required: self.permissions.required_role(path, method, header),
        })
    }

    fn check_exists(&self, path: &str) -> Result<(), Error> {
        match self.store.resource_state(path)? {
            ResourceState::Present => Ok(()),
            ResourceState::Absent => Err(Error::NotFound {
                path: path.to_string(),
            }),
            ResourceState::Gone => Err(Error::Gone {
                path: path.to_string(),
            }),
        }
    }

    /// Method mask then authorization, against the header currently in force.
    fn admit(&self, path: &str, method: Method) -> Result<HeaderInfo, Error> {
        let header = self.store.read_header(path)?;
        self.check_method(path, method, &header)?;
        self.check_authorized(path, method, &header)?;
        Ok(header)
    }

    fn head_response(&self, path: &str, status: StatusCode) -> Result<HeadResponse, Error> {
        let metadata = self.store.read_metadata(path)?;
        let header = self.store.resolve_header(&metadata.header)?;
        let etag = compute_etag(&metadata, &self.store.data_points(path)?);
        Ok(HeadResponse {
            status,
            header,
            metadata,
            etag,
        })
    }

    fn success(&mut self, event: Event) {
        self.journal.push(event);
    }

    // Reads

    fn options(&self, path: &str) -> Result<OptionsResponse, Error> {
        let header = self.store.read_header(path)?;
        let allow = header.cors.methods;
        if allow.is_empty() {
            return Err(Error::MethodNotAllowed {
                path: path.to_string(),
                method: Method::Options,
                allow,
                immutable: self.store.is_immutable(path)?,
            });
        }
        self.check_authorized(path, Method::Options, &header)?;
        Ok(OptionsResponse {
            status: StatusCode::NO_CONTENT,
            allow,
        })
    }

    fn head(&self, req: &HeadRequest, method: Method) -> Result<HeadResponse, Error> {
        let path = req.path.as_str();
        let header = self.admit(path, method)?;
        self.check_exists(path)?;

        let mut response = self.head_response(path, StatusCode::OK)?;

        if header.redirect.is_set() {
            response.status = StatusCode::from_u16(header.redirect.code).map_err(|_| {
                Error::BadRequest(format!("invalid redirect code {}", header.redirect.code))
            })?;
            debug!(path, location = %header.redirect.location, "Redirecting");
            return Ok(response);
        }

        let matches_etag = req.if_none_match == Some(response.etag);
        let not_modified = req
            .if_modified_since
            .is_some_and(|since| since >= response.metadata.last_modified);
        if matches_etag || not_modified {
            response.status = StatusCode::NOT_MODIFIED;
        }

        Ok(response)
    }

    fn locate(&self, req: &LocateRequest) -> Result<LocateResponse, Error> {
        let mut head = self.head(&req.head, Method::Locate)?;
        if head.status != StatusCode::OK {
            return Ok(LocateResponse {
                head,
                data_points: Vec::new(),
                range: None,
            });
        }

        let data_points = self.store.data_points(&req.head.path)?;
        let total = data_points.len() as u64;
        if total == 0 {
            head.status = StatusCode::NO_CONTENT;
            return Ok(LocateResponse {
                head,
                data_points,
                range: None,
            });
        }

        let range = normalize_range(req.range_chunks, total)?;
        let span = range.span(total);
        if span.is_empty() {
            head.status = StatusCode::NO_CONTENT;
            return Ok(LocateResponse {
                head,
                data_points: Vec::new(),
                range: None,
            });
        }
        if !range.covers(total) {
            head.status = StatusCode::PARTIAL_CONTENT;
        }
        let selected = data_points[*span.start() as usize..=*span.end() as usize].to_vec();

        Ok(LocateResponse {
            head,
            data_points: selected,
            range: Some(Range::new(*span.start() as i64, *span.end() as i64)),
        })
    }

    fn get(&self, req: &GetRequest) -> Result<GetResponse, Error> {
        let mut head = self.head(&req.head, Method::Get)?;
        if head.status != StatusCode::OK {
            return Ok(GetResponse {
                head,
                data: Vec::new(),
                bytes_range: None,
            });
        }

        let total = head.metadata.size;
        if total == 0 {
            head.status = StatusCode::NO_CONTENT;
            return Ok(GetResponse {
                head,
                data: Vec::new(),
                bytes_range: None,
            });
        }

        let range = normalize_range(req.range_bytes, total)?;
        let span = range.span(total);
        if span.is_empty() {
            head.status = StatusCode::NO_CONTENT;
            return Ok(GetResponse {
                head,
                data: Vec::new(),
                bytes_range: None,
            });
        }
        if !range.covers(total) {
            head.status = StatusCode::PARTIAL_CONTENT;
        }
        let bytes_range = Range::new(*span.start() as i64, *span.end() as i64);
        let data = self.store.read_bytes(&req.head.path, span)?;

        Ok(GetResponse {
            head,
            data,
            bytes_range: Some(bytes_range),
        })
    }

    fn post(&self, req: &HeadRequest) -> Result<Response, Error> {
        self.admit(&req.path, Method::Post)?;
        Err(Error::BadRequest(format!(
            "{} has no handler for {}",
            req.path,
            Method::Post
        )))
    }

    // Writes

    fn put(&mut self, req: PutRequest) -> Result<LocateResponse, Error> {
        let path = req.head.path.as_str();
        self.admit(path, Method::Put)?;
        self.store.not_immutable(path)?;

        let existed = self.store.resource_state(path)? == ResourceState::Present;
        let header = req
            .header
            .as_ref()
            .map(|header| self.store.create_header(header))
            .transpose()?;

        let registrations: Vec<_> = req
            .data
            .into_iter()
            .enumerate()
            .map(|(index, data)| DataRegistration {
                data,
                chunk_index: index as u64,
            })
            .collect();
        let length = registrations.len() as u64;

        self.store
            .upload_resource(path, &registrations, self.principal, &mut self.journal)?;
        self.store.truncate(path, length)?;
        self.store.update_metadata(
            path,
            MetadataUpdate {
                properties: Some(req.properties),
                header,
            },
            &mut self.journal,
        )?;

        let status = if existed {
            StatusCode::OK
        } else {
            StatusCode::CREATED
        };
        let response = self.written(path, status)?;
        self.success(Event::PutSuccess {
            principal: self.principal.clone(),
            response: response.clone(),
        });
        Ok(response)
    }

    fn patch(&mut self, req: &PatchRequest) -> Result<LocateResponse, Error> {
        let path = req.head.path.as_str();
        self.admit(path, Method::Patch)?;
        self.check_exists(path)?;
        self.store.not_immutable(path)?;

        self.store
            .patch_resource(path, &req.data, self.principal, &mut self.journal)?;
        self.store
            .update_metadata(path, MetadataUpdate::default(), &mut self.journal)?;

        let response = self.written(path, StatusCode::OK)?;
        self.success(Event::PatchSuccess {
            principal: self.principal.clone(),
            response: response.clone(),
        });
        Ok(response)
    }

    /// LOCATE-style view of a resource after a write.
    fn written(&self, path: &str, status: StatusCode) -> Result<LocateResponse, Error> {
        let head = self.head_response(path, status)?;
        let data_points = self.store.data_points(path)?;
        let range = match data_points.len() {
            0 => None,
            n => Some(Range::new(0, n as i64 - 1)),
        };
        Ok(LocateResponse {
            head,
            data_points,
            range,
        })
    }

    fn delete(&mut self, req: &HeadRequest) -> Result<HeadResponse, Error> {
        let path = req.path.as_str();
        self.admit(path, Method::Delete)?;
        self.check_exists(path)?;
        self.store.not_immutable(path)?;

        let response = self.head_response(path, StatusCode::OK)?;
        self.store.delete_resource(path, &mut self.journal)?;
        self.store.delete_metadata(path, &mut self.journal)?;

        self.success(Event::DeleteSuccess {
            principal: self.principal.clone(),
            response: response.clone(),
        });
        Ok(response)
    }

    fn define(&mut self, req: &DefineRequest) -> Result<DefineResponse, Error> {
        let path = req.head.path.as_str();
        self.admit(path, Method::Define)?;
        self.store.not_immutable(path)?;

        let status = match self.store.resource_state(path)? {
            ResourceState::Absent => StatusCode::CREATED,
            ResourceState::Present | ResourceState::Gone => StatusCode::OK,
        };
        let header_address: B3Id = self.store.create_header(&req.header)?;
        self.store.update_metadata(
            path,
            MetadataUpdate {
                properties: None,
                header: Some(header_address),
            },
            &mut self.journal,
        )?;

        let response = DefineResponse {
            head: self.head_response(path, status)?,
            header_address,
        };
        self.success(Event::DefineSuccess {
            principal: self.principal.clone(),
            response: response.clone(),
        });
        Ok(response)
    }
}
