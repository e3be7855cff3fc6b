use std::collections::HashMap;
use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;

use tracing::debug;

use crate::api::ApiRequest;
use crate::auth::Secret;
use crate::error::{Error, Result};

/// Accepted spellings for boolean arguments
const TRUE_WORDS: [&str; 4] = ["true", "yes", "on", "1"];
const FALSE_WORDS: [&str; 4] = ["false", "no", "off", "0"];

const REDACTED: &str = "****";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgType {
    String,
    Int,
    /// Integer within an inclusive range
    IntIn(i64, i64),
    Bool,
    Enum(&'static [&'static str]),
    Secret,
}

impl ArgType {
    fn coerce(&self, name: &str, raw: &str) -> Result<ArgValue> {
        match self {
            ArgType::String => {
                if raw.is_empty() {
                    return Err(Error::malformed(name, "must not be empty"));
                }
                Ok(ArgValue::Str(raw.to_string()))
            }
            ArgType::Int => raw
                .parse::<i64>()
                .map(ArgValue::Int)
                .map_err(|_| Error::malformed(name, format!("expected an integer, got '{}'", raw))),
            ArgType::IntIn(min, max) => {
                let value = raw.parse::<i64>().map_err(|_| {
                    Error::malformed(name, format!("expected an integer, got '{}'", raw))
                })?;
                if value < *min || value > *max {
                    return Err(Error::malformed(
                        name,
                        format!("{} is outside {}..={}", value, min, max),
                    ));
                }
                Ok(ArgValue::Int(value))
            }
            ArgType::Bool => {
                let lower = raw.to_ascii_lowercase();
                if TRUE_WORDS.contains(&lower.as_str()) {
                    Ok(ArgValue::Bool(true))
                } else if FALSE_WORDS.contains(&lower.as_str()) {
                    Ok(ArgValue::Bool(false))
                } else {
                    Err(Error::malformed(
                        name,
                        format!("expected true/false, got '{}'", raw),
                    ))
                }
            }
            ArgType::Enum(choices) => choices
                .iter()
                .find(|c| c.eq_ignore_ascii_case(raw))
                .map(|c| ArgValue::Str(c.to_string()))
                .ok_or_else(|| {
                    Error::malformed(name, format!("expected one of: {}", choices.join(", ")))
                }),
            ArgType::Secret => {
                let secret = Secret::from(raw);
                if secret.is_empty() {
                    return Err(Error::malformed(name, "must not be empty"));
                }
                Ok(ArgValue::Secret(secret))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArgSpec {
    pub name: &'static str,
    pub ty: ArgType,
    pub required: bool,
    pub default: Option<&'static str>,
}

impl ArgSpec {
    pub const fn required(name: &'static str, ty: ArgType) -> Self {
        Self {
            name,
            ty,
            required: true,
            default: None,
        }
    }

    pub const fn optional(name: &'static str, ty: ArgType) -> Self {
        Self {
            name,
            ty,
            required: false,
            default: None,
        }
    }

    pub const fn with_default(mut self, default: &'static str) -> Self {
        self.default = Some(default);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Str(String),
    Int(i64),
    Bool(bool),
    Secret(Secret),
}

/// Validated, typed arguments for one invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    values: Vec<(&'static str, ArgValue)>,
}

impl Arguments {
    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.values
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(ArgValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// String argument that the schema marks as required.
    pub fn text(&self, name: &str) -> &str {
        self.str(name).unwrap_or_default()
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(ArgValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        match self.get(name) {
            Some(ArgValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn secret(&self, name: &str) -> Option<&Secret> {
        match self.get(name) {
            Some(ArgValue::Secret(s)) => Some(s),
            _ => None,
        }
    }
}

pub type RequestBuilder = fn(&Arguments) -> ApiRequest;

/// One request loaded from a batch file, with the data row it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem {
    pub row: usize,
    pub request: ApiRequest,
}

/// Reads the file named by the arguments into requests. Every row is
/// checked before any of them is sent.
pub type BatchLoader = fn(&Arguments) -> Result<Vec<BatchItem>>;

/// Operations on the session itself rather than the server API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOp {
    Login,
    Logout,
    Status,
    Server,
}

/// Actions only the presentation layer can carry out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiAction {
    Help,
    Clear,
    Quit,
    History,
}

#[derive(Clone, Copy)]
pub enum Invoke {
    Request(RequestBuilder),
    Batch(BatchLoader),
    Session(SessionOp),
    /// Read or update the persisted key/value settings
    Settings,
    Ui(UiAction),
}

impl fmt::Debug for Invoke {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Invoke::Request(_) => f.write_str("Request(..)"),
            Invoke::Batch(_) => f.write_str("Batch(..)"),
            Invoke::Settings => f.write_str("Settings"),
            Invoke::Session(op) => f.debug_tuple("Session").field(op).finish(),
            Invoke::Ui(action) => f.debug_tuple("Ui").field(action).finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub summary: &'static str,
    pub args: Vec<ArgSpec>,
    pub invoke: Invoke,
}

impl CommandSpec {
    /// e.g. `write <site> <device> <object> <property> <value> [priority]`
    pub fn usage(&self) -> String {
        let mut usage = self.name.to_string();
        for arg in &self.args {
            if arg.required {
                let _ = write!(usage, " <{}>", arg.name);
            } else if let Some(default) = arg.default {
                let _ = write!(usage, " [{}={}]", arg.name, default);
            } else {
                let _ = write!(usage, " [{}]", arg.name);
            }
        }
        usage
    }

    /// Check `raw` against the schema and coerce every value.
    ///
    /// Tokens are either positional (filled in schema order, skipping slots
    /// already set by name) or `name=value`. A `key=value` token whose key
    /// is not an argument name is taken as a positional value.
    pub fn validate(&self, raw: &[String]) -> Result<Arguments> {
        let mut arguments = Arguments::default();
        for (arg, slot) in self.args.iter().zip(self.assign(raw)?) {
            let raw = match (slot, arg.default) {
                (Some((_, raw)), _) => raw,
                (None, Some(default)) => default,
                (None, None) if arg.required => return Err(Error::missing(arg.name)),
                (None, None) => continue,
            };
            arguments
                .values
                .push((arg.name, arg.ty.coerce(arg.name, raw)?));
        }
        Ok(arguments)
    }

    pub fn has_secret(&self) -> bool {
        self.args.iter().any(|a| a.ty == ArgType::Secret)
    }

    /// `raw` with every secret-typed value masked, fit for history and logs.
    /// If the tokens do not fit the schema at all, only the name survives.
    pub fn redact(&self, raw: &[String]) -> Vec<String> {
        if !self.has_secret() {
            return raw.to_vec();
        }
        let Ok(slots) = self.assign(raw) else {
            return Vec::new();
        };

        let mut redacted = raw.to_vec();
        for (arg, slot) in self.args.iter().zip(slots) {
            if let (ArgType::Secret, Some((token, value))) = (&arg.ty, slot) {
                redacted[token] = if value.len() == raw[token].len() {
                    REDACTED.to_string()
                } else {
                    format!("{}={}", arg.name, REDACTED)
                };
            }
        }
        redacted
    }

    /// Map each schema slot to the token (index and value) that fills it.
    fn assign<'a>(&self, raw: &'a [String]) -> Result<Vec<Option<(usize, &'a str)>>> {
        let mut slots: Vec<Option<(usize, &'a str)>> = vec![None; self.args.len()];
        let mut next_positional = 0;

        for (token_idx, token) in raw.iter().enumerate() {
            let named = token.split_once('=').and_then(|(key, value)| {
                self.args
                    .iter()
                    .position(|a| a.name.eq_ignore_ascii_case(key))
                    .map(|idx| (idx, value))
            });

            match named {
                Some((idx, value)) => {
                    if slots[idx].is_some() {
                        return Err(Error::unexpected(self.args[idx].name));
                    }
                    slots[idx] = Some((token_idx, value));
                }
                None => {
                    while next_positional < slots.len() && slots[next_positional].is_some() {
                        next_positional += 1;
                    }
                    if next_positional >= slots.len() {
                        return Err(Error::unexpected(token.as_str()));
                    }
                    slots[next_positional] = Some((token_idx, token.as_str()));
                    next_positional += 1;
                }
            }
        }
        Ok(slots)
    }
}

/// Command names and aliases mapped to their specs.
#[derive(Default)]
pub struct Registry {
    commands: Vec<Arc<CommandSpec>>,
    index: HashMap<String, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a command. Names and aliases share one case-insensitive namespace;
    /// any collision rejects the whole spec.
    pub fn register(&mut self, spec: CommandSpec) -> Result<()> {
        let mut keys: Vec<String> = Vec::with_capacity(1 + spec.aliases.len());
        for key in std::iter::once(spec.name).chain(spec.aliases.iter().copied()) {
            let key = key.to_ascii_lowercase();
            if self.index.contains_key(&key) || keys.contains(&key) {
                return Err(Error::DuplicateCommand(key));
            }
            keys.push(key);
        }

        let idx = self.commands.len();
        debug!(command = spec.name, "Registered command");
        self.commands.push(Arc::new(spec));
        for key in keys {
            self.index.insert(key, idx);
        }
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<CommandSpec>> {
        self.index
            .get(&name.to_ascii_lowercase())
            .map(|idx| self.commands[*idx].clone())
            .ok_or_else(|| Error::UnknownCommand(name.to_string()))
    }

    pub fn validate(&self, spec: &CommandSpec, raw: &[String]) -> Result<Arguments> {
        spec.validate(raw)
    }

    /// Specs in registration order.
    pub fn commands(&self) -> impl Iterator<Item = &CommandSpec> {
        self.commands.iter().map(|c| c.as_ref())
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Help for one command, or a listing of all of them.
    pub fn help(&self, name: Option<&str>) -> Result<String> {
        if let Some(name) = name {
            let spec = self.resolve(name)?;
            let mut text = format!("{}\n  {}", spec.usage(), spec.summary);
            if !spec.aliases.is_empty() {
                let _ = write!(text, "\n  aliases: {}", spec.aliases.join(", "));
            }
            return Ok(text);
        }

        let width = self.commands().map(|c| c.name.len()).max().unwrap_or(0);
        let mut text = String::from("Commands:");
        for spec in self.commands() {
            let _ = write!(text, "\n  {:width$}  {}", spec.name, spec.summary, width = width);
        }
        text.push_str("\nType `help <command>` for usage.");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ArgumentProblem;

    fn noop(_: &Arguments) -> ApiRequest {
        ApiRequest::get(["noop"])
    }

    fn spec(name: &'static str, aliases: &'static [&'static str]) -> CommandSpec {
        CommandSpec {
            name,
            aliases,
            summary: "test",
            args: vec![],
            invoke: Invoke::Request(noop),
        }
    }

    fn write_spec() -> CommandSpec {
        CommandSpec {
            name: "write",
            aliases: &[],
            summary: "Write a property",
            args: vec![
                ArgSpec::required("site", ArgType::String),
                ArgSpec::required("device", ArgType::String),
                ArgSpec::required("value", ArgType::String),
                ArgSpec::optional("priority", ArgType::IntIn(1, 16)),
                ArgSpec::optional("mode", ArgType::Enum(&["fast", "safe"])).with_default("safe"),
                ArgSpec::optional("force", ArgType::Bool),
            ],
            invoke: Invoke::Request(noop),
        }
    }

    fn raw(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|s| s.to_string()).collect()
    }

    fn problem(err: Error) -> (String, ArgumentProblem) {
        match err {
            Error::Argument { argument, problem } => (argument, problem),
            other => panic!("expected argument error, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_register_keeps_first() {
        let mut registry = Registry::new();
        registry.register(spec("sites", &[])).unwrap();

        let mut second = spec("sites", &[]);
        second.summary = "second";
        let err = registry.register(second).unwrap_err();
        assert_eq!(err, Error::DuplicateCommand("sites".to_string()));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve("sites").unwrap().summary, "test");
    }

    #[test]
    fn test_alias_collisions_are_duplicates() {
        let mut registry = Registry::new();
        registry.register(spec("quit", &["exit", "q"])).unwrap();

        assert!(matches!(
            registry.register(spec("exit", &[])),
            Err(Error::DuplicateCommand(_))
        ));
        assert!(matches!(
            registry.register(spec("leave", &["Q"])),
            Err(Error::DuplicateCommand(_))
        ));
        // Alias equal to its own name
        assert!(matches!(
            registry.register(spec("read", &["read"])),
            Err(Error::DuplicateCommand(_))
        ));
        // Nothing half-registered
        assert!(matches!(registry.resolve("leave"), Err(Error::UnknownCommand(_))));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolve_by_alias_case_insensitive() {
        let mut registry = Registry::new();
        registry.register(spec("quit", &["exit"])).unwrap();
        assert_eq!(registry.resolve("EXIT").unwrap().name, "quit");
        assert_eq!(
            registry.resolve("bogus").unwrap_err(),
            Error::UnknownCommand("bogus".to_string())
        );
    }

    #[test]
    fn test_validate_positional_and_defaults() {
        let args = write_spec()
            .validate(&raw(&["Main", "100", "72.5"]))
            .unwrap();
        assert_eq!(args.str("site"), Some("Main"));
        assert_eq!(args.str("device"), Some("100"));
        assert_eq!(args.str("value"), Some("72.5"));
        assert_eq!(args.int("priority"), None);
        assert_eq!(args.str("mode"), Some("safe"));
        assert_eq!(args.bool("force"), None);
    }

    #[test]
    fn test_validate_named_mixed_with_positional() {
        let args = write_spec()
            .validate(&raw(&["device=200", "Main", "on", "priority=8", "MODE=Fast", "force=yes"]))
            .unwrap();
        assert_eq!(args.str("site"), Some("Main"));
        assert_eq!(args.str("device"), Some("200"));
        assert_eq!(args.str("value"), Some("on"));
        assert_eq!(args.int("priority"), Some(8));
        assert_eq!(args.str("mode"), Some("fast"));
        assert_eq!(args.bool("force"), Some(true));
    }

    #[test]
    fn test_validate_unknown_key_is_positional_value() {
        let args = write_spec()
            .validate(&raw(&["Main", "100", "a=b"]))
            .unwrap();
        assert_eq!(args.str("value"), Some("a=b"));
    }

    #[test]
    fn test_missing_required_names_the_field() {
        let (argument, kind) = problem(write_spec().validate(&raw(&["Main", "100"])).unwrap_err());
        assert_eq!(argument, "value");
        assert_eq!(kind, ArgumentProblem::Missing);

        let (argument, _) = problem(write_spec().validate(&raw(&["value=1"])).unwrap_err());
        assert_eq!(argument, "site");
    }

    #[test]
    fn test_int_coercion_never_truncates() {
        for bad in ["3.5", "12abc", "", "8 "] {
            let priority = format!("priority={}", bad);
            let tokens = raw(&["Main", "100", "1", priority.as_str()]);
            let (argument, kind) = problem(write_spec().validate(&tokens).unwrap_err());
            assert_eq!(argument, "priority");
            assert!(matches!(kind, ArgumentProblem::Malformed(_)), "{:?}", bad);
        }
    }

    #[test]
    fn test_int_range_enforced() {
        let (argument, kind) =
            problem(write_spec().validate(&raw(&["Main", "100", "1", "17"])).unwrap_err());
        assert_eq!(argument, "priority");
        assert!(matches!(kind, ArgumentProblem::Malformed(ref why) if why.contains("1..=16")));
    }

    #[test]
    fn test_bool_and_enum_malformed() {
        let (argument, _) = problem(
            write_spec()
                .validate(&raw(&["Main", "100", "1", "force=maybe"]))
                .unwrap_err(),
        );
        assert_eq!(argument, "force");

        let (argument, kind) = problem(
            write_spec()
                .validate(&raw(&["Main", "100", "1", "mode=turbo"]))
                .unwrap_err(),
        );
        assert_eq!(argument, "mode");
        assert_eq!(
            kind,
            ArgumentProblem::Malformed("expected one of: fast, safe".to_string())
        );
    }

    #[test]
    fn test_surplus_and_repeated_arguments() {
        let tokens = raw(&["a", "b", "c", "1", "safe", "true", "extra"]);
        let (argument, kind) = problem(write_spec().validate(&tokens).unwrap_err());
        assert_eq!(argument, "extra");
        assert_eq!(kind, ArgumentProblem::Unexpected);

        let (argument, kind) = problem(
            write_spec()
                .validate(&raw(&["site=a", "site=b", "1", "2"]))
                .unwrap_err(),
        );
        assert_eq!(argument, "site");
        assert_eq!(kind, ArgumentProblem::Unexpected);
    }

    #[test]
    fn test_redact_masks_secrets_only() {
        let login = CommandSpec {
            name: "login",
            aliases: &[],
            summary: "Log in",
            args: vec![
                ArgSpec::optional("username", ArgType::String),
                ArgSpec::optional("password", ArgType::Secret),
            ],
            invoke: Invoke::Session(SessionOp::Login),
        };
        assert_eq!(login.redact(&raw(&["op", "hunter2"])), raw(&["op", "****"]));
        assert_eq!(
            login.redact(&raw(&["password=hunter2", "op"])),
            raw(&["password=****", "op"])
        );
        assert!(login.redact(&raw(&["a", "b", "c"])).is_empty());

        let (argument, kind) = problem(login.validate(&raw(&["op", "password="])).unwrap_err());
        assert_eq!(argument, "password");
        assert_eq!(kind, ArgumentProblem::Malformed("must not be empty".to_string()));

        let tokens = raw(&["Main", "100", "secret=1"]);
        assert_eq!(write_spec().redact(&tokens), tokens);
    }

    #[test]
    fn test_usage_and_help() {
        assert_eq!(
            write_spec().usage(),
            "write <site> <device> <value> [priority] [mode=safe] [force]"
        );

        let mut registry = Registry::new();
        registry.register(write_spec()).unwrap();
        registry.register(spec("quit", &["exit"])).unwrap();

        let all = registry.help(None).unwrap();
        assert!(all.contains("write  Write a property"));
        assert!(all.contains("quit"));

        let one = registry.help(Some("exit")).unwrap();
        assert!(one.starts_with("quit"));
        assert!(one.contains("aliases: exit"));

        assert!(matches!(registry.help(Some("nope")), Err(Error::UnknownCommand(_))));
    }
}
