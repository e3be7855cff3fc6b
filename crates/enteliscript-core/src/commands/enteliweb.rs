//! Built-in command table.
//!
//! The BACnet hierarchy is exposed by enteliWEB under `api/.bacnet`:
//! site → device → object → property. Every data command below maps to
//! exactly one request against that tree.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::api::{ApiRequest, Method};
use crate::error::{Error, Result};

use super::registry::{
    ArgSpec, ArgType, Arguments, BatchItem, CommandSpec, Invoke, Registry, SessionOp, UiAction,
};

/// Root of the BACnet web-services tree
const BACNET_ROOT: [&str; 2] = ["api", ".bacnet"];

/// BACnet command priorities run 1 (highest) to 16
const PRIORITY: ArgType = ArgType::IntIn(1, 16);

const ALARM_STATES: &[&str] = &["active", "all"];

fn bacnet(segments: &[&str]) -> ApiRequest {
    ApiRequest::get(BACNET_ROOT.iter().chain(segments).copied()).query("alt", "json")
}

fn property_path<'a>(args: &'a Arguments, property: &'a str) -> [&'a str; 4] {
    [
        args.text("site"),
        args.text("device"),
        args.text("object"),
        property,
    ]
}

fn sites(_: &Arguments) -> ApiRequest {
    bacnet(&[])
}

fn devices(args: &Arguments) -> ApiRequest {
    bacnet(&[args.text("site")])
}

fn objects(args: &Arguments) -> ApiRequest {
    bacnet(&[args.text("site"), args.text("device")])
}

fn read(args: &Arguments) -> ApiRequest {
    bacnet(&property_path(args, args.text("property")))
}

fn write(args: &Arguments) -> ApiRequest {
    let mut request = bacnet(&property_path(args, args.text("property")));
    request.method = Method::Put;
    if let Some(priority) = args.int("priority") {
        request = request.query("priority", priority.to_string());
    }
    request.body(json!({ "value": args.text("value") }))
}

fn relinquish(args: &Arguments) -> ApiRequest {
    let mut request = bacnet(&property_path(args, "present-value"));
    request.method = Method::Put;
    let priority = args.int("priority").unwrap_or(16);
    request
        .query("priority", priority.to_string())
        .body(json!({ "value": Value::Null }))
}

fn alarms(args: &Arguments) -> ApiRequest {
    bacnet(&[args.text("site"), "alarms"]).query("state", args.text("state"))
}

/// One line of a batch write file. `property` defaults to present-value.
#[derive(Debug, Deserialize)]
struct WriteRow {
    site: String,
    device: String,
    object: String,
    #[serde(default)]
    property: Option<String>,
    value: String,
    #[serde(default)]
    priority: Option<String>,
}

impl WriteRow {
    /// The row as `write` arguments, so it is checked exactly like a typed
    /// command.
    fn tokens(self) -> Vec<String> {
        let mut tokens = vec![
            format!("site={}", self.site),
            format!("device={}", self.device),
            format!("object={}", self.object),
            format!(
                "property={}",
                self.property.as_deref().unwrap_or("present-value")
            ),
            format!("value={}", self.value),
        ];
        if let Some(priority) = self.priority {
            tokens.push(format!("priority={}", priority));
        }
        tokens
    }
}

/// Load a CSV file with a `site,device,object,property,value,priority`
/// header into one `write` request per row.
fn write_batch(args: &Arguments) -> Result<Vec<BatchItem>> {
    let path = args.text("file");
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_path(path)
        .map_err(|e| Error::malformed("file", format!("cannot open {}: {}", path, e)))?;

    let spec = write_spec();
    let mut items = Vec::new();
    for (idx, row) in reader.deserialize::<WriteRow>().enumerate() {
        let number = idx + 1;
        let row_error = |why: String| Error::malformed("file", format!("row {}: {}", number, why));

        let row = row.map_err(|e| row_error(e.to_string()))?;
        let arguments = spec
            .validate(&row.tokens())
            .map_err(|e| row_error(e.to_string()))?;
        items.push(BatchItem {
            row: number,
            request: write(&arguments),
        });
    }

    if items.is_empty() {
        return Err(Error::malformed("file", format!("{} has no rows", path)));
    }
    debug!(path, rows = items.len(), "Loaded batch write file");
    Ok(items)
}

fn object_args() -> Vec<ArgSpec> {
    vec![
        ArgSpec::required("site", ArgType::String),
        ArgSpec::required("device", ArgType::String),
        ArgSpec::required("object", ArgType::String),
    ]
}

fn write_spec() -> CommandSpec {
    CommandSpec {
        name: "write",
        aliases: &["set"],
        summary: "Write an object property, optionally at a command priority",
        args: {
            let mut args = object_args();
            args.push(ArgSpec::required("property", ArgType::String));
            args.push(ArgSpec::required("value", ArgType::String));
            args.push(ArgSpec::optional("priority", PRIORITY));
            args
        },
        invoke: Invoke::Request(write),
    }
}

pub fn builtin_commands() -> Vec<CommandSpec> {
    vec![
        // ----- Session -----
        CommandSpec {
            name: "login",
            aliases: &["connect"],
            summary: "Log in to an enteliWEB server (prompts for the password)",
            args: vec![
                ArgSpec::optional("url", ArgType::String),
                ArgSpec::optional("username", ArgType::String),
                ArgSpec::optional("password", ArgType::Secret),
                ArgSpec::optional("version", ArgType::String),
            ],
            invoke: Invoke::Session(SessionOp::Login),
        },
        CommandSpec {
            name: "logout",
            aliases: &["disconnect"],
            summary: "End the session; forget=true also removes saved credentials",
            args: vec![ArgSpec::optional("forget", ArgType::Bool).with_default("false")],
            invoke: Invoke::Session(SessionOp::Logout),
        },
        CommandSpec {
            name: "status",
            aliases: &["whoami"],
            summary: "Show the server, user and session state",
            args: vec![],
            invoke: Invoke::Session(SessionOp::Status),
        },
        CommandSpec {
            name: "server",
            aliases: &[],
            summary: "Point at a different server",
            args: vec![
                ArgSpec::required("url", ArgType::String),
                ArgSpec::optional("version", ArgType::String),
            ],
            invoke: Invoke::Session(SessionOp::Server),
        },
        // ----- BACnet hierarchy -----
        CommandSpec {
            name: "sites",
            aliases: &[],
            summary: "List sites",
            args: vec![],
            invoke: Invoke::Request(sites),
        },
        CommandSpec {
            name: "devices",
            aliases: &[],
            summary: "List devices on a site",
            args: vec![ArgSpec::required("site", ArgType::String)],
            invoke: Invoke::Request(devices),
        },
        CommandSpec {
            name: "objects",
            aliases: &[],
            summary: "List objects in a device",
            args: vec![
                ArgSpec::required("site", ArgType::String),
                ArgSpec::required("device", ArgType::String),
            ],
            invoke: Invoke::Request(objects),
        },
        CommandSpec {
            name: "read",
            aliases: &["get"],
            summary: "Read an object property",
            args: {
                let mut args = object_args();
                args.push(
                    ArgSpec::optional("property", ArgType::String).with_default("present-value"),
                );
                args
            },
            invoke: Invoke::Request(read),
        },
        write_spec(),
        CommandSpec {
            name: "write-batch",
            aliases: &["writes"],
            summary: "Write every row of a CSV file (site,device,object,property,value,priority)",
            args: vec![ArgSpec::required("file", ArgType::String)],
            invoke: Invoke::Batch(write_batch),
        },
        CommandSpec {
            name: "relinquish",
            aliases: &[],
            summary: "Release a commanded present-value at a priority",
            args: {
                let mut args = object_args();
                args.push(ArgSpec::required("priority", PRIORITY));
                args
            },
            invoke: Invoke::Request(relinquish),
        },
        CommandSpec {
            name: "alarms",
            aliases: &[],
            summary: "List alarms on a site",
            args: vec![
                ArgSpec::required("site", ArgType::String),
                ArgSpec::optional("state", ArgType::Enum(ALARM_STATES)).with_default("active"),
            ],
            invoke: Invoke::Request(alarms),
        },
        // ----- Local -----
        CommandSpec {
            name: "setting",
            aliases: &["settings", "config"],
            summary: "List saved settings, show one, or save a new value",
            args: vec![
                ArgSpec::optional("key", ArgType::String),
                ArgSpec::optional("value", ArgType::String),
            ],
            invoke: Invoke::Settings,
        },
        // ----- Terminal -----
        CommandSpec {
            name: "help",
            aliases: &["?"],
            summary: "List commands, or show usage for one",
            args: vec![ArgSpec::optional("command", ArgType::String)],
            invoke: Invoke::Ui(UiAction::Help),
        },
        CommandSpec {
            name: "history",
            aliases: &[],
            summary: "Show previously entered commands",
            args: vec![],
            invoke: Invoke::Ui(UiAction::History),
        },
        CommandSpec {
            name: "clear",
            aliases: &["cls"],
            summary: "Clear the output log",
            args: vec![],
            invoke: Invoke::Ui(UiAction::Clear),
        },
        CommandSpec {
            name: "quit",
            aliases: &["exit", "q"],
            summary: "Leave enteliscript",
            args: vec![],
            invoke: Invoke::Ui(UiAction::Quit),
        },
    ]
}

/// A registry holding every built-in command.
pub fn builtin_registry() -> Result<Registry> {
    let mut registry = Registry::new();
    for spec in builtin_commands() {
        registry.register(spec)?;
    }
    Ok(registry)
}
