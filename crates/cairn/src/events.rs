//! Notifications emitted by committed invocations.

use serde::Serialize;
use tracing::info;

use crate::id::B3Id;
use crate::messages::{DefineResponse, HeadResponse, LocateResponse};
use crate::role::{Principal, Role};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    ResourceCreated {
        path: String,
    },
    ResourceUpdated {
        path: String,
        chunk_index: u64,
    },
    ResourceDeleted {
        path: String,
    },
    MetadataUpdated {
        path: String,
    },
    MetadataDeleted {
        path: String,
    },
    PutSuccess {
        principal: Principal,
        response: LocateResponse,
    },
    PatchSuccess {
        principal: Principal,
        response: LocateResponse,
    },
    DeleteSuccess {
        principal: Principal,
        response: HeadResponse,
    },
    DefineSuccess {
        principal: Principal,
        response: DefineResponse,
    },
    RoleGranted {
        role: Role,
        account: Principal,
        sender: Principal,
    },
    RoleRevoked {
        role: Role,
        account: Principal,
        sender: Principal,
    },
    ResourceRoleCreated {
        role: Role,
    },
    SiteAdminChanged {
        old: Role,
        new: Role,
    },
    DefaultHeaderChanged {
        address: B3Id,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::ResourceCreated { .. } => "resource_created",
            Event::ResourceUpdated { .. } => "resource_updated",
            Event::ResourceDeleted { .. } => "resource_deleted",
            Event::MetadataUpdated { .. } => "metadata_updated",
            Event::MetadataDeleted { .. } => "metadata_deleted",
            Event::PutSuccess { .. } => "put_success",
            Event::PatchSuccess { .. } => "patch_success",
            Event::DeleteSuccess { .. } => "delete_success",
            Event::DefineSuccess { .. } => "define_success",
            Event::RoleGranted { .. } => "role_granted",
            Event::RoleRevoked { .. } => "role_revoked",
            Event::ResourceRoleCreated { .. } => "resource_role_created",
            Event::SiteAdminChanged { .. } => "site_admin_changed",
            Event::DefaultHeaderChanged { .. } => "default_header_changed",
        }
    }

    pub(crate) fn emit(&self) {
        match self {
            Event::ResourceCreated { path }
            | Event::ResourceDeleted { path }
            | Event::MetadataUpdated { path }
            | Event::MetadataDeleted { path } => info!(event = self.name(), %path),
            Event::ResourceUpdated { path, chunk_index } => {
                info!(event = self.name(), %path, chunk_index)
            }
            Event::PutSuccess { principal, response }
            | Event::PatchSuccess { principal, response } => info!(
                event = self.name(),
                %principal,
                status = response.head.status.as_u16(),
                etag = %response.head.etag,
            ),
            Event::DeleteSuccess { principal, response } => info!(
                event = self.name(),
                %principal,
                etag = %response.etag,
            ),
            Event::DefineSuccess { principal, response } => info!(
                event = self.name(),
                %principal,
                header = %response.header_address,
            ),
            Event::RoleGranted {
                role,
                account,
                sender,
            }
            | Event::RoleRevoked {
                role,
                account,
                sender,
            } => info!(event = self.name(), %role, %account, %sender),
            Event::ResourceRoleCreated { role } => info!(event = self.name(), %role),
            Event::SiteAdminChanged { old, new } => info!(event = self.name(), %old, %new),
            Event::DefaultHeaderChanged { address } => info!(event = self.name(), %address),
        }
    }
}
