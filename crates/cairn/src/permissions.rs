//! Role-based permission registry.
//!
//! Membership is stored explicitly in `role_members`. Three roles are never
//! looked up directly:
//!
//! - `PUBLIC` is held by every principal that is not blacklisted.
//! - `DEFAULT_ADMIN` members hold every role.
//! - Per-resource admin roles are derived from the path on every check, so
//!   there is no stored hierarchy to keep in sync.
//!
//! The current SITE_ADMIN identifier lives in the site settings; changing it
//! re-targets every check that names SITE_ADMIN without touching any row.

use rusqlite::{Connection, params};
use tracing::{debug, info};

use crate::db::{get_setting, put_setting};
use crate::error::Error;
use crate::events::Event;
use crate::header::HeaderInfo;
use crate::method::Method;
use crate::role::{Principal, Role};

const SITE_ADMIN_KEY: &str = "site_admin";

/// Built-in admin roles, only granted through the dedicated admin path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdminRole {
    Default,
    Site,
}

pub struct PermissionRegistry<'a> {
    conn: &'a Connection,
}

impl<'a> PermissionRegistry<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Make `owner` a DEFAULT_ADMIN and record the initial SITE_ADMIN id.
    pub(crate) fn bootstrap(&self, owner: &Principal) -> Result<(), Error> {
        if get_setting(self.conn, SITE_ADMIN_KEY)?.is_none() {
            put_setting(
                self.conn,
                SITE_ADMIN_KEY,
                Role::initial_site_admin().as_bytes(),
            )?;
        }
        self.insert_member(Role::DEFAULT_ADMIN, owner)?;
        info!(%owner, "Bootstrapped site owner");
        Ok(())
    }

    /// The role currently acting as SITE_ADMIN.
    pub fn site_admin_role(&self) -> Result<Role, Error> {
        let Some(value) = get_setting(self.conn, SITE_ADMIN_KEY)? else {
            return Ok(Role::initial_site_admin());
        };
        let bytes: [u8; 32] = value
            .try_into()
            .map_err(|_| Error::BadRequest("corrupt site admin setting".into()))?;
        Ok(Role::from(bytes))
    }

    fn is_member(&self, role: Role, principal: &Principal) -> Result<bool, Error> {
        Ok(self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM role_members WHERE role = ?1 AND principal = ?2)",
            params![role, principal],
            |row| row.get(0),
        )?)
    }

    pub fn is_blacklisted(&self, principal: &Principal) -> Result<bool, Error> {
        self.is_member(Role::blacklist(), principal)
    }

    pub fn has_role(&self, role: Role, principal: &Principal) -> Result<bool, Error> {
        if role == Role::public() {
            return Ok(!self.is_blacklisted(principal)?);
        }
        Ok(self.is_member(role, principal)? || self.is_member(Role::DEFAULT_ADMIN, principal)?)
    }

    /// Holds the per-resource admin role for `path`, SITE_ADMIN or DEFAULT_ADMIN.
    pub fn is_resource_admin(&self, path: &str, principal: &Principal) -> Result<bool, Error> {
        Ok(self.is_member(Role::resource_admin(path), principal)?
            || self.has_role(self.site_admin_role()?, principal)?)
    }

    /// Decide whether `principal` may call `method` on `path` under `header`.
    pub fn authorize(
        &self,
        path: &str,
        method: Method,
        header: &HeaderInfo,
        principal: &Principal,
    ) -> Result<bool, Error> {
        let role = header.cors.role_for(method);
        if role == Role::public() {
            if !self.is_blacklisted(principal)? {
                return Ok(true);
            }
        } else if role != Role::DEFAULT_ADMIN && self.has_role(role, principal)? {
            return Ok(true);
        }

        let allowed = self.is_resource_admin(path, principal)?;
        debug!(path, %method, %principal, %role, allowed, "Authorization fell back to admins");
        Ok(allowed)
    }

    /// Role reported to a caller that failed [`authorize`](Self::authorize).
    pub fn required_role(&self, path: &str, method: Method, header: &HeaderInfo) -> Role {
        let role = header.cors.role_for(method);
        if role == Role::public() || role == Role::DEFAULT_ADMIN {
            Role::resource_admin(path)
        } else {
            role
        }
    }

    /// Role whose members may grant and revoke `role`.
    pub fn role_admin(&self, role: Role) -> Result<Role, Error> {
        let managed: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM resource_roles WHERE role = ?1)",
            params![role],
            |row| row.get(0),
        )?;
        if managed || role == Role::blacklist() {
            self.site_admin_role()
        } else {
            Ok(Role::DEFAULT_ADMIN)
        }
    }

    fn not_admin_role(&self, role: Role) -> Result<(), Error> {
        if role == Role::public() {
            return Err(Error::InvalidRole {
                role,
                reason: "membership is implicit",
            });
        }
        if role == Role::DEFAULT_ADMIN || role == self.site_admin_role()? {
            return Err(Error::InvalidRole {
                role,
                reason: "admin roles are managed through the admin path",
            });
        }
        Ok(())
    }

    pub(crate) fn require(
        &self,
        role: Role,
        sender: &Principal,
        action: &str,
    ) -> Result<(), Error> {
        if self.has_role(role, sender)? {
            Ok(())
        } else {
            Err(Error::Forbidden {
                action: action.to_string(),
                required: role,
            })
        }
    }

    fn insert_member(&self, role: Role, account: &Principal) -> Result<bool, Error> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO role_members (role, principal) VALUES (?1, ?2)",
            params![role, account],
        )?;
        Ok(changed > 0)
    }

    fn delete_member(&self, role: Role, account: &Principal) -> Result<bool, Error> {
        let changed = self.conn.execute(
            "DELETE FROM role_members WHERE role = ?1 AND principal = ?2",
            params![role, account],
        )?;
        Ok(changed > 0)
    }

    fn granted(
        &self,
        role: Role,
        account: &Principal,
        sender: &Principal,
        journal: &mut Vec<Event>,
    ) -> Result<(), Error> {
        if self.insert_member(role, account)? {
            journal.push(Event::RoleGranted {
                role,
                account: account.clone(),
                sender: sender.clone(),
            });
        }
        Ok(())
    }

    fn revoked(
        &self,
        role: Role,
        account: &Principal,
        sender: &Principal,
        journal: &mut Vec<Event>,
    ) -> Result<(), Error> {
        if self.delete_member(role, account)? {
            journal.push(Event::RoleRevoked {
                role,
                account: account.clone(),
                sender: sender.clone(),
            });
        }
        Ok(())
    }

    /// Generic grant. The caller must hold the role's admin role.
    pub fn grant_role(
        &self,
        sender: &Principal,
        role: Role,
        account: &Principal,
        journal: &mut Vec<Event>,
    ) -> Result<(), Error> {
        self.not_admin_role(role)?;
        self.require(self.role_admin(role)?, sender, "grant role")?;
        self.granted(role, account, sender, journal)
    }

    /// Generic revoke. The caller must hold the role's admin role.
    pub fn revoke_role(
        &self,
        sender: &Principal,
        role: Role,
        account: &Principal,
        journal: &mut Vec<Event>,
    ) -> Result<(), Error> {
        self.not_admin_role(role)?;
        self.require(self.role_admin(role)?, sender, "revoke role")?;
        self.revoked(role, account, sender, journal)
    }

    fn admin_role_id(&self, which: AdminRole) -> Result<Role, Error> {
        match which {
            AdminRole::Default => Ok(Role::DEFAULT_ADMIN),
            AdminRole::Site => self.site_admin_role(),
        }
    }

    pub fn grant_admin_role(
        &self,
        sender: &Principal,
        which: AdminRole,
        account: &Principal,
        journal: &mut Vec<Event>,
    ) -> Result<(), Error> {
        self.require(Role::DEFAULT_ADMIN, sender, "grant admin role")?;
        let role = self.admin_role_id(which)?;
        self.granted(role, account, sender, journal)
    }

    pub fn revoke_admin_role(
        &self,
        sender: &Principal,
        which: AdminRole,
        account: &Principal,
        journal: &mut Vec<Event>,
    ) -> Result<(), Error> {
        self.require(Role::DEFAULT_ADMIN, sender, "revoke admin role")?;
        let role = self.admin_role_id(which)?;

        if role == Role::DEFAULT_ADMIN && self.is_member(role, account)? {
            let remaining: i64 = self.conn.query_row(
                "SELECT COUNT(*) FROM role_members WHERE role = ?1",
                params![role],
                |row| row.get(0),
            )?;
            if remaining <= 1 {
                return Err(Error::InvalidRole {
                    role,
                    reason: "cannot revoke the last default admin",
                });
            }
        }

        self.revoked(role, account, sender, journal)
    }

    /// Point SITE_ADMIN at a new role identifier.
    pub fn change_site_admin(
        &self,
        sender: &Principal,
        new: Role,
        journal: &mut Vec<Event>,
    ) -> Result<(), Error> {
        self.require(Role::DEFAULT_ADMIN, sender, "change site admin")?;

        let old = self.site_admin_role()?;
        let reason = if new == Role::DEFAULT_ADMIN {
            Some("default admin cannot act as site admin")
        } else if new == Role::public() || new == Role::blacklist() {
            Some("reserved role")
        } else if new == old {
            Some("already the site admin")
        } else {
            None
        };
        if let Some(reason) = reason {
            return Err(Error::InvalidRole { role: new, reason });
        }

        put_setting(self.conn, SITE_ADMIN_KEY, new.as_bytes())?;
        journal.push(Event::SiteAdminChanged { old, new });
        Ok(())
    }

    /// Register a role administered by SITE_ADMIN.
    pub fn create_resource_role(
        &self,
        sender: &Principal,
        role: Role,
        journal: &mut Vec<Event>,
    ) -> Result<(), Error> {
        self.require(self.site_admin_role()?, sender, "create resource role")?;
        self.not_admin_role(role)?;
        if role == Role::blacklist() {
            return Err(Error::InvalidRole {
                role,
                reason: "reserved role",
            });
        }

        if self.register_resource_role(role)? {
            journal.push(Event::ResourceRoleCreated { role });
        }
        Ok(())
    }

    fn register_resource_role(&self, role: Role) -> Result<bool, Error> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO resource_roles (role) VALUES (?1)",
            params![role],
        )?;
        Ok(changed > 0)
    }

    pub fn grant_resource_admin(
        &self,
        sender: &Principal,
        path: &str,
        account: &Principal,
        journal: &mut Vec<Event>,
    ) -> Result<(), Error> {
        self.require(self.site_admin_role()?, sender, "grant resource admin")?;
        let role = Role::resource_admin(path);
        self.register_resource_role(role)?;
        self.granted(role, account, sender, journal)
    }

    pub fn revoke_resource_admin(
        &self,
        sender: &Principal,
        path: &str,
        account: &Principal,
        journal: &mut Vec<Event>,
    ) -> Result<(), Error> {
        self.require(self.site_admin_role()?, sender, "revoke resource admin")?;
        self.revoked(Role::resource_admin(path), account, sender, journal)
    }

    /// Explicit members of a role.
    pub fn members(&self, role: Role) -> Result<Vec<Principal>, Error> {
        let mut stmt = self
            .conn
            .prepare("SELECT principal FROM role_members WHERE role = ?1 ORDER BY principal")?;
        let rows = stmt.query_map(params![role], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}
