use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use cairn::{
    AdminRole, B3Id, Config, DataRegistration, DefineRequest, ErrorResponse, GetRequest,
    HeadRequest, HeaderInfo, LocateRequest, PatchRequest, Principal, PutRequest, Range, Request,
    ResourceProperties, Response, Role, Site,
};
use clap::{Parser, Subcommand};
use lloggs::LoggingArgs;
use serde_json::json;
use tracing::info;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser, Debug)]
#[command(name = "cairn")]
#[command(about = "Run protocol requests against a local cairn site")]
struct Args {
    /// Site directory (database and chunk store)
    #[arg(long, short, default_value = ".")]
    site: PathBuf,

    /// Principal making the request; becomes the owner of a new site
    #[arg(long, short, default_value = "owner")]
    principal: String,

    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    logging: LoggingArgs,
}

#[derive(clap::Args, Debug)]
struct Conditions {
    /// Answer 304 when the current ETag equals this
    #[arg(long)]
    if_none_match: Option<B3Id>,

    /// Answer 304 when not modified after this unix timestamp
    #[arg(long)]
    if_modified_since: Option<i64>,
}

#[derive(clap::Args, Debug)]
struct RangeArgs {
    /// First index, negative counts from the end
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    start: i64,

    /// Last index (inclusive); 0,0 selects everything
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    end: i64,
}

#[derive(clap::Args, Debug)]
struct PropertyArgs {
    /// Two-byte MIME type code
    #[arg(long, value_parser = parse_code)]
    mime: Option<[u8; 2]>,

    /// Two-byte charset code
    #[arg(long, value_parser = parse_code)]
    charset: Option<[u8; 2]>,

    /// Two-byte encoding code
    #[arg(long, value_parser = parse_code)]
    encoding: Option<[u8; 2]>,

    /// Two-byte language code
    #[arg(long, value_parser = parse_code)]
    language: Option<[u8; 2]>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the site if it does not exist
    Init,
    /// Allowed methods for a path
    Options { path: String },
    /// Header, metadata and ETag of a resource
    Head {
        path: String,
        #[command(flatten)]
        conditions: Conditions,
    },
    /// Chunk addresses within a chunk range
    Locate {
        path: String,
        #[command(flatten)]
        range: RangeArgs,
        #[command(flatten)]
        conditions: Conditions,
    },
    /// Bytes within a byte range
    Get {
        path: String,
        #[command(flatten)]
        range: RangeArgs,
        #[command(flatten)]
        conditions: Conditions,
        /// Write the bytes to this file instead of printing them
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Replace a resource with the contents of a file
    Put {
        path: String,
        file: PathBuf,
        /// Bytes per chunk
        #[arg(long, default_value_t = 256 * 1024)]
        chunk_size: usize,
        /// JSON header definition to attach
        #[arg(long)]
        header: Option<PathBuf>,
        #[command(flatten)]
        properties: PropertyArgs,
    },
    /// Overwrite existing chunks
    Patch {
        path: String,
        /// INDEX=FILE, repeatable
        #[arg(long = "chunk", value_parser = parse_chunk, required = true)]
        chunks: Vec<(u64, PathBuf)>,
    },
    /// Delete a resource, leaving it gone
    Delete { path: String },
    /// Replace the header of a resource
    Define {
        path: String,
        /// JSON header definition
        header: PathBuf,
    },
    /// Grant a role: default-admin, site-admin, blacklist, admin:<path>, name:<NAME> or hex
    Grant { role: String, account: String },
    /// Revoke a role (same role syntax as grant)
    Revoke { role: String, account: String },
    /// Register a role administered by the site admin
    CreateRole { role: String },
    /// Point SITE_ADMIN at another role
    SiteAdmin { role: String },
    /// Replace the site default header
    DefaultHeader {
        /// JSON header definition
        header: PathBuf,
    },
}

/// Role arguments, routed to the operation that manages them.
enum RoleArg {
    Admin(AdminRole),
    Resource(String),
    Plain(Role),
}

fn parse_role(s: &str) -> Result<RoleArg, BoxError> {
    Ok(match s {
        "default-admin" => RoleArg::Admin(AdminRole::Default),
        "site-admin" => RoleArg::Admin(AdminRole::Site),
        "public" => RoleArg::Plain(Role::public()),
        "blacklist" => RoleArg::Plain(Role::blacklist()),
        _ => {
            if let Some(path) = s.strip_prefix("admin:") {
                RoleArg::Resource(path.to_string())
            } else if let Some(name) = s.strip_prefix("name:") {
                RoleArg::Plain(Role::named(name))
            } else {
                RoleArg::Plain(s.parse()?)
            }
        }
    })
}

fn plain_role(s: &str) -> Result<Role, BoxError> {
    match parse_role(s)? {
        RoleArg::Plain(role) => Ok(role),
        _ => Err(format!("{s} is not an ordinary role").into()),
    }
}

fn parse_code(s: &str) -> Result<[u8; 2], String> {
    s.as_bytes()
        .try_into()
        .map_err(|_| format!("expected exactly two bytes, got {s:?}"))
}

fn parse_chunk(s: &str) -> Result<(u64, PathBuf), String> {
    let (index, file) = s
        .split_once('=')
        .ok_or_else(|| format!("expected INDEX=FILE, got {s:?}"))?;
    let index = index
        .parse()
        .map_err(|err| format!("invalid chunk index {index:?}: {err}"))?;
    Ok((index, PathBuf::from(file)))
}

fn read_header(path: &Path) -> Result<HeaderInfo, BoxError> {
    Ok(serde_json::from_slice(&fs::read(path)?)?)
}

fn head_request(path: String, conditions: Conditions) -> HeadRequest {
    HeadRequest {
        path,
        if_modified_since: conditions.if_modified_since,
        if_none_match: conditions.if_none_match,
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<(), BoxError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<ExitCode, BoxError> {
    let args = Args::parse();
    let _guard = args.logging.setup(|v| match v {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    })?;

    let principal = Principal::new(args.principal);
    let config = Config::new(&args.site, principal.clone());
    let mut site = Site::open(&config)?;

    let outcome = match args.command {
        Command::Init => {
            info!(site = ?args.site, "Site ready");
            print_json(&json!({
                "site": args.site,
                "site_admin": site.site_admin_role()?,
                "default_admins": site.members(Role::DEFAULT_ADMIN)?,
            }))?;
            return Ok(ExitCode::SUCCESS);
        }
        Command::Options { path } => site.handle(&principal, Request::Options { path }),
        Command::Head { path, conditions } => {
            site.handle(&principal, Request::Head(head_request(path, conditions)))
        }
        Command::Locate {
            path,
            range,
            conditions,
        } => site.handle(
            &principal,
            Request::Locate(LocateRequest {
                head: head_request(path, conditions),
                range_chunks: Range::new(range.start, range.end),
            }),
        ),
        Command::Get {
            path,
            range,
            conditions,
            output,
        } => {
            let response = site.handle(
                &principal,
                Request::Get(GetRequest {
                    head: head_request(path, conditions),
                    range_bytes: Range::new(range.start, range.end),
                }),
            );
            if let (Some(output), Ok(Response::Get(get))) = (&output, &response) {
                fs::write(output, &get.data)?;
                info!(?output, bytes = get.data.len(), "Wrote content");
                print_json(&json!({
                    "head": get.head,
                    "bytes_range": get.bytes_range,
                    "output": output,
                }))?;
                return Ok(ExitCode::SUCCESS);
            }
            response
        }
        Command::Put {
            path,
            file,
            chunk_size,
            header,
            properties,
        } => {
            if chunk_size == 0 {
                return Err("chunk size must be positive".into());
            }
            let content = fs::read(&file)?;
            let data = content.chunks(chunk_size).map(<[u8]>::to_vec).collect();
            let header = header.as_deref().map(read_header).transpose()?;
            let properties = ResourceProperties {
                mime_type: properties.mime.unwrap_or_default(),
                charset: properties.charset.unwrap_or_default(),
                encoding: properties.encoding.unwrap_or_default(),
                language: properties.language.unwrap_or_default(),
            };
            site.handle(
                &principal,
                Request::Put(PutRequest {
                    head: HeadRequest::new(path),
                    properties,
                    header,
                    data,
                }),
            )
        }
        Command::Patch { path, chunks } => {
            let data = chunks
                .into_iter()
                .map(|(chunk_index, file)| {
                    Ok(DataRegistration {
                        data: fs::read(file)?,
                        chunk_index,
                    })
                })
                .collect::<Result<Vec<_>, BoxError>>()?;
            site.handle(
                &principal,
                Request::Patch(PatchRequest {
                    head: HeadRequest::new(path),
                    data,
                }),
            )
        }
        Command::Delete { path } => {
            site.handle(&principal, Request::Delete(HeadRequest::new(path)))
        }
        Command::Define { path, header } => site.handle(
            &principal,
            Request::Define(DefineRequest {
                head: HeadRequest::new(path),
                header: read_header(&header)?,
            }),
        ),
        Command::Grant { role, account } => {
            let account = Principal::new(account);
            let result = match parse_role(&role)? {
                RoleArg::Admin(which) => site.grant_admin_role(&principal, which, &account),
                RoleArg::Resource(path) => site.grant_resource_admin(&principal, &path, &account),
                RoleArg::Plain(role) => site.grant_role(&principal, role, &account),
            };
            return finish_admin(&mut site, result);
        }
        Command::Revoke { role, account } => {
            let account = Principal::new(account);
            let result = match parse_role(&role)? {
                RoleArg::Admin(which) => site.revoke_admin_role(&principal, which, &account),
                RoleArg::Resource(path) => {
                    site.revoke_resource_admin(&principal, &path, &account)
                }
                RoleArg::Plain(role) => site.revoke_role(&principal, role, &account),
            };
            return finish_admin(&mut site, result);
        }
        Command::CreateRole { role } => {
            let result = site.create_resource_role(&principal, plain_role(&role)?);
            return finish_admin(&mut site, result);
        }
        Command::SiteAdmin { role } => {
            let result = site.change_site_admin(&principal, plain_role(&role)?);
            return finish_admin(&mut site, result);
        }
        Command::DefaultHeader { header } => {
            let result = site
                .set_default_header(&principal, &read_header(&header)?)
                .map(|_| ());
            return finish_admin(&mut site, result);
        }
    };

    match outcome {
        Ok(response) => {
            print_json(&response)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            print_json(&ErrorResponse::from(&err))?;
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Print the notifications of an administrative call, or its error.
fn finish_admin<R: cairn::BlobRegistry>(
    site: &mut Site<R>,
    result: Result<(), cairn::Error>,
) -> Result<ExitCode, BoxError> {
    match result {
        Ok(()) => {
            print_json(&site.take_events())?;
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            print_json(&ErrorResponse::from(&err))?;
            Ok(ExitCode::FAILURE)
        }
    }
}
