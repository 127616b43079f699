//! End-to-end protocol scenarios against an in-memory site.

use cairn::{
    AdminRole, B3Id, CorsPolicy, DataRegistration, DefineRequest, Error, ErrorResponse, Event,
    GetRequest, HeadRequest, HeaderInfo, LocateRequest, MemoryRegistry, Method, MethodSet,
    PatchRequest, Principal, PutRequest, Range, Redirect, Request, Response, Role, Site, SiteDb,
};
use http::StatusCode;

const NOW: i64 = 1_700_000_000;

fn owner() -> Principal {
    Principal::from("owner")
}

fn site() -> Site<MemoryRegistry> {
    site_with(MemoryRegistry::new())
}

fn site_with(registry: MemoryRegistry) -> Site<MemoryRegistry> {
    let mut site = Site::new(SiteDb::open_in_memory().unwrap(), registry, &owner())
        .unwrap()
        .with_clock(|| NOW);
    site.take_events();
    site
}

fn put(path: &str, chunks: &[&[u8]]) -> Request {
    put_with_header(path, chunks, None)
}

fn put_with_header(path: &str, chunks: &[&[u8]], header: Option<HeaderInfo>) -> Request {
    Request::Put(PutRequest {
        head: HeadRequest::new(path),
        properties: Default::default(),
        header,
        data: chunks.iter().map(|chunk| chunk.to_vec()).collect(),
    })
}

fn head(site: &mut Site<MemoryRegistry>, path: &str) -> Result<cairn::HeadResponse, Error> {
    match site.handle(&owner(), Request::Head(HeadRequest::new(path)))? {
        Response::Head(head) => Ok(head),
        other => panic!("unexpected response {other:?}"),
    }
}

fn get(
    site: &mut Site<MemoryRegistry>,
    path: &str,
    range: Range,
) -> Result<cairn::GetResponse, Error> {
    let request = Request::Get(GetRequest {
        head: HeadRequest::new(path),
        range_bytes: range,
    });
    match site.handle(&owner(), request)? {
        Response::Get(get) => Ok(get),
        other => panic!("unexpected response {other:?}"),
    }
}

fn locate(
    site: &mut Site<MemoryRegistry>,
    path: &str,
    range: Range,
) -> Result<cairn::LocateResponse, Error> {
    let request = Request::Locate(LocateRequest {
        head: HeadRequest::new(path),
        range_chunks: range,
    });
    match site.handle(&owner(), request)? {
        Response::Locate(locate) => Ok(locate),
        other => panic!("unexpected response {other:?}"),
    }
}

fn define(path: &str, header: HeaderInfo) -> Request {
    Request::Define(DefineRequest {
        head: HeadRequest::new(path),
        header,
    })
}

fn immutable_header() -> HeaderInfo {
    let mut header = HeaderInfo::site_default();
    header.cache.immutable = true;
    header
}

#[test]
fn delete_then_put_again() {
    let mut site = site();

    let created = site
        .handle(&owner(), put_with_header("/a", &[b"X"], Some(HeaderInfo::site_default())))
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);

    let before = head(&mut site, "/a").unwrap();
    assert_eq!(before.status, StatusCode::OK);
    assert_eq!(before.metadata.size, 1);
    assert_eq!(before.metadata.version, 1);

    let deleted = site
        .handle(&owner(), Request::Delete(HeadRequest::new("/a")))
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::OK);

    let err = head(&mut site, "/a").unwrap_err();
    assert_eq!(err.status(), StatusCode::GONE);
    let err = get(&mut site, "/a", Range::FULL).unwrap_err();
    assert_eq!(err.status(), StatusCode::GONE);
    let err = locate(&mut site, "/a", Range::FULL).unwrap_err();
    assert_eq!(err.status(), StatusCode::GONE);

    let again = site.handle(&owner(), put("/a", &[b"Y"])).unwrap();
    assert_eq!(again.status(), StatusCode::CREATED);

    let after = head(&mut site, "/a").unwrap();
    assert_eq!(after.status, StatusCode::OK);
    assert_eq!(after.metadata.size, 1);
    assert!(after.metadata.version > before.metadata.version);
    assert_ne!(after.etag, before.etag);
}

#[test]
fn never_created_is_not_found() {
    let mut site = site();
    let err = head(&mut site, "/nothing").unwrap_err();
    assert_eq!(err.status(), StatusCode::NOT_FOUND);
}

#[test]
fn method_outside_mask_reports_allow() {
    let mut site = site();
    let read_only = HeaderInfo {
        cors: CorsPolicy::uniform(
            [Method::Get, Method::Head].into_iter().collect(),
            Role::public(),
        ),
        ..HeaderInfo::default()
    };
    site.handle(&owner(), define("/b", read_only)).unwrap();

    let Response::Options(options) = site
        .handle(&Principal::from("anyone"), Request::Options { path: "/b".into() })
        .unwrap()
    else {
        panic!("expected OPTIONS response");
    };
    assert_eq!(options.status, StatusCode::NO_CONTENT);
    let allow: MethodSet = [Method::Get, Method::Head].into_iter().collect();
    assert_eq!(options.allow, allow);

    let err = site.handle(&owner(), put("/b", &[b"x"])).unwrap_err();
    assert_eq!(err.status(), StatusCode::METHOD_NOT_ALLOWED);
    let body = ErrorResponse::from(&err);
    assert_eq!(body.allow, Some(allow));
    assert_eq!(body.immutable, Some(false));
}

#[test]
fn empty_mask_rejects_options() {
    let mut site = site();
    let closed = HeaderInfo {
        cors: CorsPolicy::uniform(MethodSet::EMPTY, Role::public()),
        ..HeaderInfo::default()
    };
    site.handle(&owner(), define("/closed", closed)).unwrap();

    let err = site
        .handle(&owner(), Request::Options { path: "/closed".into() })
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[test]
fn immutable_resource_rejects_every_write() {
    let mut site = site();
    site.handle(&owner(), put_with_header("/c", &[b"frozen"], Some(immutable_header())))
        .unwrap();

    let patch = Request::Patch(PatchRequest {
        head: HeadRequest::new("/c"),
        data: vec![DataRegistration {
            data: b"thawed".to_vec(),
            chunk_index: 0,
        }],
    });
    let attempts = [
        put("/c", &[b"again"]),
        patch,
        Request::Delete(HeadRequest::new("/c")),
        define("/c", HeaderInfo::site_default()),
    ];
    for request in attempts {
        let method = request.method();
        let err = site.handle(&owner(), request).unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT, "{method}");
    }

    let current = head(&mut site, "/c").unwrap();
    assert_eq!(current.metadata.version, 1);
    assert!(current.header.is_immutable());
}

#[test]
fn immutable_header_without_content_is_still_writable() {
    let mut site = site();
    site.handle(&owner(), define("/empty", immutable_header()))
        .unwrap();
    let response = site.handle(&owner(), put("/empty", &[b"first"])).unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[test]
fn patch_overwrites_existing_chunks_only() {
    let mut site = site();
    site.handle(&owner(), put("/d", &[b"aa", b"bb"])).unwrap();
    site.take_events();

    let patch = |chunk_index: u64, data: &[u8]| {
        Request::Patch(PatchRequest {
            head: HeadRequest::new("/d"),
            data: vec![DataRegistration {
                data: data.to_vec(),
                chunk_index,
            }],
        })
    };

    let err = site.handle(&owner(), patch(2, b"cc")).unwrap_err();
    assert_eq!(err.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert!(matches!(
        err,
        Error::OutOfBoundsChunk {
            chunk_index: 2,
            length: 2,
            ..
        }
    ));
    assert!(site.take_events().is_empty());

    let Response::Patch(patched) = site.handle(&owner(), patch(1, b"BBB")).unwrap() else {
        panic!("expected PATCH response");
    };
    assert_eq!(patched.head.status, StatusCode::OK);
    assert_eq!(patched.head.metadata.version, 2);
    assert_eq!(patched.head.metadata.size, 5);
    assert_eq!(
        patched.data_points,
        vec![B3Id::hash(b"aa"), B3Id::hash(b"BBB")]
    );

    let events = site.take_events();
    assert!(events
        .iter()
        .any(|event| matches!(event, Event::ResourceUpdated { chunk_index: 1, .. })));
    assert!(matches!(
        events.last(),
        Some(Event::PatchSuccess { principal, .. }) if *principal == owner()
    ));
}

#[test]
fn patch_requires_existing_resource() {
    let mut site = site();
    let err = site
        .handle(
            &owner(),
            Request::Patch(PatchRequest {
                head: HeadRequest::new("/missing"),
                data: Vec::new(),
            }),
        )
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::NOT_FOUND);
}

#[test]
fn identical_headers_share_an_address() {
    let mut site = site();
    let shared = HeaderInfo {
        cors: CorsPolicy::uniform(MethodSet::ALL, Role::DEFAULT_ADMIN)
            .with_origin(Method::Get, Role::public()),
        ..HeaderInfo::default()
    };

    site.handle(&owner(), put_with_header("/e", &[b"same"], Some(shared.clone())))
        .unwrap();
    site.handle(&owner(), put_with_header("/f", &[b"same"], Some(shared.clone())))
        .unwrap();

    let e = site.read_metadata("/e").unwrap();
    let f = site.read_metadata("/f").unwrap();
    assert_eq!(e.header, f.header);
    assert_eq!(e.header, shared.address().unwrap());

    let Response::Define(defined) = site.handle(&owner(), define("/g", shared)).unwrap() else {
        panic!("expected DEFINE response");
    };
    assert_eq!(defined.head.status, StatusCode::CREATED);
    assert_eq!(defined.header_address, e.header);
}

#[test]
fn conditional_head_returns_not_modified() {
    let mut site = site();
    site.handle(&owner(), put("/h", &[b"cached"])).unwrap();
    let current = head(&mut site, "/h").unwrap();

    let conditional = |if_none_match: Option<B3Id>, if_modified_since: Option<i64>| {
        Request::Get(GetRequest {
            head: HeadRequest {
                path: "/h".into(),
                if_modified_since,
                if_none_match,
            },
            range_bytes: Range::FULL,
        })
    };

    let by_etag = site
        .handle(&owner(), conditional(Some(current.etag), None))
        .unwrap();
    assert_eq!(by_etag.status(), StatusCode::NOT_MODIFIED);
    let Response::Get(by_etag) = by_etag else {
        panic!("expected GET response");
    };
    assert!(by_etag.data.is_empty());

    let by_date = site.handle(&owner(), conditional(None, Some(NOW))).unwrap();
    assert_eq!(by_date.status(), StatusCode::NOT_MODIFIED);

    let stale = site
        .handle(&owner(), conditional(Some(B3Id::hash(b"old")), Some(NOW - 1)))
        .unwrap();
    assert_eq!(stale.status(), StatusCode::OK);
}

#[test]
fn byte_ranges() {
    let mut site = site();
    site.handle(&owner(), put("/r", &[b"hello", b" ", b"world"]))
        .unwrap();

    let full = get(&mut site, "/r", Range::FULL).unwrap();
    assert_eq!(full.head.status, StatusCode::OK);
    assert_eq!(full.data, b"hello world");
    assert_eq!(full.bytes_range, Some(Range::new(0, 10)));

    let also_full = get(&mut site, "/r", Range::new(-1, 0)).unwrap();
    assert_eq!(also_full.head.status, StatusCode::OK);
    assert_eq!(also_full.data, full.data);

    let end_at_length = get(&mut site, "/r", Range::new(0, 11)).unwrap();
    assert_eq!(end_at_length.head.status, StatusCode::OK);
    assert_eq!(end_at_length.bytes_range, Some(Range::new(0, 10)));

    let partial = get(&mut site, "/r", Range::new(3, 7)).unwrap();
    assert_eq!(partial.head.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(partial.data, b"lo wo");

    let err = get(&mut site, "/r", Range::new(0, 20)).unwrap_err();
    assert_eq!(err.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    let body = ErrorResponse::from(&err);
    assert_eq!(body.range, Some(Range::new(0, 20)));
    assert_eq!(body.index, Some(20));

    let err = get(&mut site, "/r", Range::new(5, 2)).unwrap_err();
    assert_eq!(err.status(), StatusCode::RANGE_NOT_SATISFIABLE);
}

#[test]
fn chunk_ranges() {
    let mut site = site();
    site.handle(&owner(), put("/l", &[b"one", b"two", b"three"]))
        .unwrap();

    let full = locate(&mut site, "/l", Range::FULL).unwrap();
    assert_eq!(full.head.status, StatusCode::OK);
    assert_eq!(full.data_points.len(), 3);

    let middle = locate(&mut site, "/l", Range::new(1, 1)).unwrap();
    assert_eq!(middle.head.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(middle.data_points, vec![B3Id::hash(b"two")]);
    assert_eq!(middle.range, Some(Range::new(1, 1)));

    let from_end = locate(&mut site, "/l", Range::new(-2, -1)).unwrap();
    assert_eq!(from_end.range, Some(Range::new(0, 1)));
    assert_eq!(from_end.head.status, StatusCode::PARTIAL_CONTENT);
}

#[test]
fn range_starting_at_length_has_no_content() {
    let mut site = site();
    site.handle(&owner(), put("/r", &[b"abc", b"def", b"ghi"]))
        .unwrap();

    let located = locate(&mut site, "/r", Range::new(3, 3)).unwrap();
    assert_eq!(located.head.status, StatusCode::NO_CONTENT);
    assert!(located.data_points.is_empty());
    assert_eq!(located.range, None);

    let fetched = get(&mut site, "/r", Range::new(9, 9)).unwrap();
    assert_eq!(fetched.head.status, StatusCode::NO_CONTENT);
    assert!(fetched.data.is_empty());
    assert_eq!(fetched.bytes_range, None);

    let last = get(&mut site, "/r", Range::new(8, 9)).unwrap();
    assert_eq!(last.head.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(last.data, b"i");
    assert_eq!(last.bytes_range, Some(Range::new(8, 8)));
}

#[test]
fn empty_resource_has_no_content() {
    let mut site = site();
    site.handle(&owner(), put("/nil", &[])).unwrap();

    let located = locate(&mut site, "/nil", Range::FULL).unwrap();
    assert_eq!(located.head.status, StatusCode::NO_CONTENT);
    assert!(located.data_points.is_empty());

    let fetched = get(&mut site, "/nil", Range::FULL).unwrap();
    assert_eq!(fetched.head.status, StatusCode::NO_CONTENT);
}

#[test]
fn redirect_replaces_success_status() {
    let mut site = site();
    site.handle(&owner(), put("/old", &[b"moved"])).unwrap();

    let mut header = HeaderInfo::site_default();
    header.redirect = Redirect {
        code: 301,
        location: "/new".into(),
    };
    site.handle(&owner(), define("/old", header)).unwrap();

    let response = head(&mut site, "/old").unwrap();
    assert_eq!(response.status, StatusCode::MOVED_PERMANENTLY);
    assert_eq!(response.header.redirect.location, "/new");

    let located = locate(&mut site, "/old", Range::FULL).unwrap();
    assert_eq!(located.head.status, StatusCode::MOVED_PERMANENTLY);
    assert!(located.data_points.is_empty());
}

#[test]
fn permissions_gate_requests() {
    let mut site = site();
    let alice = Principal::from("alice");
    let mallory = Principal::from("mallory");
    site.handle(&owner(), put("/p", &[b"public"])).unwrap();

    let err = site.handle(&alice, put("/p", &[b"mine"])).unwrap_err();
    assert_eq!(err.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        ErrorResponse::from(&err).required_role,
        Some(Role::resource_admin("/p"))
    );

    site.handle(&alice, Request::Head(HeadRequest::new("/p")))
        .unwrap();

    site.grant_role(&owner(), Role::blacklist(), &mallory).unwrap();
    let err = site
        .handle(&mallory, Request::Head(HeadRequest::new("/p")))
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::FORBIDDEN);

    site.grant_resource_admin(&owner(), "/p", &alice).unwrap();
    let response = site.handle(&alice, put("/p", &[b"mine"])).unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let err = site.handle(&alice, put("/q", &[b"elsewhere"])).unwrap_err();
    assert_eq!(err.status(), StatusCode::FORBIDDEN);
}

#[test]
fn site_admin_manages_resource_admins() {
    let mut site = site();
    let alice = Principal::from("alice");
    let bob = Principal::from("bob");

    let err = site.grant_resource_admin(&alice, "/s", &bob).unwrap_err();
    assert!(matches!(err, Error::Forbidden { .. }));

    site.grant_admin_role(&owner(), AdminRole::Site, &alice)
        .unwrap();
    site.grant_resource_admin(&alice, "/s", &bob).unwrap();
    site.handle(&bob, put("/s", &[b"bob"])).unwrap();

    site.change_site_admin(&owner(), Role::named("OTHER_SITE_ADMIN"))
        .unwrap();
    let err = site.revoke_resource_admin(&alice, "/s", &bob).unwrap_err();
    assert!(matches!(err, Error::Forbidden { .. }));

    let events = site.take_events();
    assert!(events
        .iter()
        .any(|event| matches!(event, Event::SiteAdminChanged { .. })));
}

#[test]
fn successful_put_emits_notifications_in_order() {
    let mut site = site();
    site.handle(&owner(), put("/n", &[b"note"])).unwrap();

    let names: Vec<_> = site.take_events().iter().map(Event::name).collect();
    assert_eq!(
        names,
        ["resource_created", "metadata_updated", "put_success"]
    );
}

#[test]
fn republishing_content_pays_original_publisher() {
    let mut site = site_with(MemoryRegistry::with_royalty_rate(2));
    let bob = Principal::from("bob");
    site.grant_admin_role(&owner(), AdminRole::Default, &bob)
        .unwrap();

    site.handle(&owner(), put("/x", &[b"shared"])).unwrap();
    site.handle(&bob, put("/y", &[b"shared"])).unwrap();

    let royalties = site.registry().royalties();
    assert_eq!(royalties.balance(&owner()).unwrap(), 12);
    assert_eq!(royalties.balance(&bob).unwrap(), 0);
    assert_eq!(royalties.charged(&bob).unwrap(), 12);
}

