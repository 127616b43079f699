//! A site: database, blob registry and the invocations run against them.
//!
//! Every invocation runs inside one SQLite transaction. Notifications are
//! staged while it runs and only emitted once the transaction commits, so a
//! failed invocation leaves neither rows nor events behind.

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db::SiteDb;
use crate::dispatcher::Dispatcher;
use crate::error::Error;
use crate::events::Event;
use crate::header::HeaderInfo;
use crate::id::B3Id;
use crate::messages::{Request, Response};
use crate::metadata::ResourceMetadata;
use crate::permissions::{AdminRole, PermissionRegistry};
use crate::registry::{BlobRegistry, FsRegistry};
use crate::role::{Principal, Role};
use crate::store::ResourceStore;

fn system_clock() -> i64 {
    jiff::Timestamp::now().as_second()
}

pub struct Site<R: BlobRegistry> {
    db: SiteDb,
    registry: R,
    clock: fn() -> i64,
    events: Vec<Event>,
}

impl Site<FsRegistry> {
    /// Open the site stored under `config.storage_path`, creating it if needed.
    pub fn open(config: &Config) -> Result<Self, Error> {
        let registry = FsRegistry::new(&config.storage_path);
        registry.init()?;
        let db = SiteDb::open(&config.database_path())?;
        info!(storage = ?config.storage_path, "Opened site");
        Site::new(db, registry, &config.owner)
    }
}

impl<R: BlobRegistry> Site<R> {
    /// Wrap a database and registry. A fresh database gets the built-in
    /// default header and `owner` as its first DEFAULT_ADMIN.
    pub fn new(db: SiteDb, registry: R, owner: &Principal) -> Result<Self, Error> {
        let mut site = Self {
            db,
            registry,
            clock: system_clock,
            events: Vec::new(),
        };

        site.invoke(|conn, registry, now, journal| {
            let store = ResourceStore::new(conn, registry, now);
            if !store.default_header_address()?.is_zero() {
                return Ok(());
            }
            store.set_default_header(&HeaderInfo::site_default(), journal)?;
            PermissionRegistry::new(conn).bootstrap(owner)
        })?;

        Ok(site)
    }

    /// Replace the source of `last_modified` timestamps.
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    fn invoke<T>(
        &mut self,
        f: impl FnOnce(&Connection, &R, i64, &mut Vec<Event>) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let now = (self.clock)();
        let tx = self.db.transaction()?;
        let mut journal = Vec::new();

        let result = f(&tx, &self.registry, now, &mut journal).and_then(|value| {
            tx.commit()?;
            Ok(value)
        });

        match result {
            Ok(value) => {
                self.registry.commit()?;
                for event in &journal {
                    event.emit();
                }
                self.events.append(&mut journal);
                Ok(value)
            }
            Err(err) => {
                self.registry.rollback();
                if err.status().is_server_error() {
                    warn!(%err, "Invocation rolled back");
                } else {
                    debug!(%err, status = err.status().as_u16(), "Invocation rejected");
                }
                Err(err)
            }
        }
    }

    /// Run one protocol request as `caller`.
    pub fn handle(&mut self, caller: &Principal, request: Request) -> Result<Response, Error> {
        self.invoke(|conn, registry, now, journal| {
            let mut dispatcher = Dispatcher::new(
                PermissionRegistry::new(conn),
                ResourceStore::new(conn, registry, now),
                caller,
            );
            let response = dispatcher.handle(request)?;
            journal.extend(dispatcher.into_events());
            Ok(response)
        })
    }

    pub fn set_default_header(
        &mut self,
        sender: &Principal,
        header: &HeaderInfo,
    ) -> Result<B3Id, Error> {
        self.invoke(|conn, registry, now, journal| {
            PermissionRegistry::new(conn).require(
                Role::DEFAULT_ADMIN,
                sender,
                "set default header",
            )?;
            ResourceStore::new(conn, registry, now).set_default_header(header, journal)
        })
    }

    pub fn grant_role(
        &mut self,
        sender: &Principal,
        role: Role,
        account: &Principal,
    ) -> Result<(), Error> {
        self.invoke(|conn, _, _, journal| {
            PermissionRegistry::new(conn).grant_role(sender, role, account, journal)
        })
    }

    pub fn revoke_role(
        &mut self,
        sender: &Principal,
        role: Role,
        account: &Principal,
    ) -> Result<(), Error> {
        self.invoke(|conn, _, _, journal| {
            PermissionRegistry::new(conn).revoke_role(sender, role, account, journal)
        })
    }

    pub fn grant_admin_role(
        &mut self,
        sender: &Principal,
        which: AdminRole,
        account: &Principal,
    ) -> Result<(), Error> {
        self.invoke(|conn, _, _, journal| {
            PermissionRegistry::new(conn).grant_admin_role(sender, which, account, journal)
        })
    }

    pub fn revoke_admin_role(
        &mut self,
        sender: &Principal,
        which: AdminRole,
        account: &Principal,
    ) -> Result<(), Error> {
        self.invoke(|conn, _, _, journal| {
            PermissionRegistry::new(conn).revoke_admin_role(sender, which, account, journal)
        })
    }

    pub fn change_site_admin(&mut self, sender: &Principal, new: Role) -> Result<(), Error> {
        self.invoke(|conn, _, _, journal| {
            PermissionRegistry::new(conn).change_site_admin(sender, new, journal)
        })
    }

    pub fn create_resource_role(&mut self, sender: &Principal, role: Role) -> Result<(), Error> {
        self.invoke(|conn, _, _, journal| {
            PermissionRegistry::new(conn).create_resource_role(sender, role, journal)
        })
    }

    pub fn grant_resource_admin(
        &mut self,
        sender: &Principal,
        path: &str,
        account: &Principal,
    ) -> Result<(), Error> {
        self.invoke(|conn, _, _, journal| {
            PermissionRegistry::new(conn).grant_resource_admin(sender, path, account, journal)
        })
    }

    pub fn revoke_resource_admin(
        &mut self,
        sender: &Principal,
        path: &str,
        account: &Principal,
    ) -> Result<(), Error> {
        self.invoke(|conn, _, _, journal| {
            PermissionRegistry::new(conn).revoke_resource_admin(sender, path, account, journal)
        })
    }

    // Reads outside any invocation.

    pub fn has_role(&self, role: Role, principal: &Principal) -> Result<bool, Error> {
        PermissionRegistry::new(self.db.connection()).has_role(role, principal)
    }

    pub fn site_admin_role(&self) -> Result<Role, Error> {
        PermissionRegistry::new(self.db.connection()).site_admin_role()
    }

    pub fn members(&self, role: Role) -> Result<Vec<Principal>, Error> {
        PermissionRegistry::new(self.db.connection()).members(role)
    }

    pub fn read_header(&self, path: &str) -> Result<HeaderInfo, Error> {
        ResourceStore::new(self.db.connection(), &self.registry, (self.clock)()).read_header(path)
    }

    pub fn read_metadata(&self, path: &str) -> Result<ResourceMetadata, Error> {
        ResourceStore::new(self.db.connection(), &self.registry, (self.clock)())
            .read_metadata(path)
    }

    /// Drain the notifications of committed invocations.
    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{HeadRequest, PutRequest};
    use crate::registry::MemoryRegistry;

    fn site() -> Site<MemoryRegistry> {
        Site::new(
            SiteDb::open_in_memory().unwrap(),
            MemoryRegistry::new(),
            &Principal::from("owner"),
        )
        .unwrap()
        .with_clock(|| 1_700_000_000)
    }

    #[test]
    fn bootstrap_installs_default_header_and_owner() {
        let mut site = site();
        assert_eq!(site.read_header("/any").unwrap(), HeaderInfo::site_default());
        assert!(site
            .has_role(Role::DEFAULT_ADMIN, &Principal::from("owner"))
            .unwrap());

        let events = site.take_events();
        assert!(matches!(events[..], [Event::DefaultHeaderChanged { .. }]));
        assert!(site.take_events().is_empty());
    }

    #[test]
    fn failed_invocation_commits_nothing() {
        let mut site = site();
        site.take_events();
        let owner = Principal::from("owner");

        let err = site
            .handle(
                &owner,
                Request::Put(PutRequest {
                    head: HeadRequest::new("/a"),
                    properties: Default::default(),
                    header: None,
                    data: vec![b"ok".to_vec(), Vec::new()],
                }),
            )
            .unwrap_err();
        assert_eq!(err.status().as_u16(), 400);
        assert!(site.take_events().is_empty());
        assert_eq!(site.read_metadata("/a").unwrap(), ResourceMetadata::default());
    }

    #[test]
    fn rolled_back_invocation_pays_no_royalty() {
        let mut site = Site::new(
            SiteDb::open_in_memory().unwrap(),
            MemoryRegistry::with_royalty_rate(1),
            &Principal::from("owner"),
        )
        .unwrap();
        let alice = Principal::from("alice");
        let bob = Principal::from("bob");

        site.invoke(|_, registry, _, _| Ok(registry.write(&alice, b"shared")?))
            .unwrap();
        let err = site
            .invoke(|_, registry, _, _| {
                registry.write(&bob, b"shared")?;
                Err::<(), _>(Error::BadRequest("late failure".into()))
            })
            .unwrap_err();
        assert_eq!(err.status().as_u16(), 400);
        assert_eq!(site.registry().royalties().balance(&alice).unwrap(), 0);
        assert_eq!(site.registry().royalties().charged(&bob).unwrap(), 0);

        site.invoke(|_, registry, _, _| Ok(registry.write(&bob, b"shared")?))
            .unwrap();
        assert_eq!(site.registry().royalties().balance(&alice).unwrap(), 6);
        assert_eq!(site.registry().royalties().charged(&bob).unwrap(), 6);
    }

    #[test]
    fn default_header_requires_default_admin() {
        let mut site = site();
        let err = site
            .set_default_header(&Principal::from("alice"), &HeaderInfo::site_default())
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden { required, .. } if required == Role::DEFAULT_ADMIN));
    }
}
