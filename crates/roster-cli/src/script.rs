//! JSON-lines command binding.
//!
//! Each input line is one command tagged by `op`; each produces exactly one
//! response line:
//!
//! ```text
//! {"op":"create","kind":"usergroup","fields":{"shortname":"root","commonName":"Root"},"bind":"root"}
//! {"op":"create","kind":"usergroup","fields":{"shortname":"node1","commonName":"Node 1","memberOf":["@root"]}}
//! {"op":"get","kind":"usergroup","uuid":"@root"}
//! ```
//!
//! A string of the form `@name` in `uuid`, or in the `memberOf`,
//! `nestedGroups` and `members` lists of `fields`, is replaced by the id
//! bound to `name` by an earlier `create`.

use std::collections::HashMap;
use std::io::{self, BufRead, Write};

use roster_core::{
    DirectoryError, EntityKind, ErrorKind, GroupId, NewUser, NewUserGroup, UserGroupPatch, UserId,
    UserPatch,
};
use roster_store::Directory;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A single scripted directory operation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    Create {
        kind: EntityKind,
        #[serde(default)]
        fields: Map<String, Value>,
        /// Name under which the new id can be referenced as `@name`.
        #[serde(default)]
        bind: Option<String>,
    },
    Get {
        kind: EntityKind,
        uuid: String,
    },
    Update {
        kind: EntityKind,
        uuid: String,
        #[serde(default)]
        fields: Map<String, Value>,
    },
    Delete {
        kind: EntityKind,
        uuid: String,
    },
    List {
        kind: EntityKind,
    },
    Check,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Get { .. } => "get",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
            Self::List { .. } => "list",
            Self::Check => "check",
        }
    }
}

/// Errors raised while executing a command.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error("Malformed command: {0}")]
    Malformed(String),

    #[error("Unbound name: @{0}")]
    Unbound(String),

    #[error("Invalid uuid {value:?}: {reason}")]
    InvalidId { value: String, reason: String },

    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ScriptError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Directory(e) => e.kind(),
            Self::Malformed(_) | Self::Unbound(_) | Self::InvalidId { .. } => {
                ErrorKind::InvalidArgument
            }
            Self::Encode(_) => ErrorKind::Internal,
        }
    }
}

/// One output line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
}

impl From<Result<Value, ScriptError>> for Response {
    fn from(outcome: Result<Value, ScriptError>) -> Self {
        match outcome {
            Ok(result) => Self {
                ok: true,
                result: Some(result),
                error: None,
            },
            Err(e) => Self {
                ok: false,
                result: None,
                error: Some(ErrorBody {
                    kind: e.kind().as_str(),
                    message: e.to_string(),
                }),
            },
        }
    }
}

/// Totals for a completed script.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub executed: usize,
    pub failed: usize,
    /// Execution stopped at the first failure.
    pub stopped_early: bool,
}

/// A directory plus the `@name` bindings made so far.
pub struct Session {
    directory: Directory,
    bindings: HashMap<String, Uuid>,
}

impl Session {
    pub fn new(directory: Directory) -> Self {
        Self {
            directory,
            bindings: HashMap::new(),
        }
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Execute every non-blank line of `input`, writing one response line per
    /// command to `output`.
    pub async fn run<R: BufRead, W: Write>(
        &mut self,
        input: R,
        output: &mut W,
        fail_fast: bool,
    ) -> io::Result<Summary> {
        let mut summary = Summary::default();

        for line in input.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let response = self.execute_line(line).await;
            summary.executed += 1;
            serde_json::to_writer(&mut *output, &response)?;
            writeln!(output)?;

            if !response.ok {
                summary.failed += 1;
                if fail_fast {
                    summary.stopped_early = true;
                    break;
                }
            }
        }

        output.flush()?;
        Ok(summary)
    }

    /// Parse and execute one line. Never fails: errors become responses.
    pub async fn execute_line(&mut self, line: &str) -> Response {
        let outcome = match serde_json::from_str::<Command>(line) {
            Ok(command) => {
                let name = command.name();
                let outcome = self.execute(command).await;
                tracing::debug!(op = name, ok = outcome.is_ok(), "command executed");
                outcome
            }
            Err(e) => Err(ScriptError::Malformed(e.to_string())),
        };
        Response::from(outcome)
    }

    pub async fn execute(&mut self, command: Command) -> Result<Value, ScriptError> {
        match command {
            Command::Create { kind, fields, bind } => {
                let fields = self.resolve_fields(fields)?;
                let id = match kind {
                    EntityKind::User => {
                        let fields: NewUser = decode(fields)?;
                        self.directory.users().create(fields).await?.0
                    }
                    EntityKind::UserGroup => {
                        let fields: NewUserGroup = decode(fields)?;
                        self.directory.usergroups().create(fields).await?.0
                    }
                };
                if let Some(name) = bind {
                    self.bindings.insert(name, id);
                }
                Ok(object("uuid", Value::String(id.to_string())))
            }
            Command::Get { kind, uuid } => {
                let id = self.resolve_id(&uuid)?;
                match kind {
                    EntityKind::User => encode(self.directory.users().get(UserId(id)).await?),
                    EntityKind::UserGroup => {
                        encode(self.directory.usergroups().get(GroupId(id)).await?)
                    }
                }
            }
            Command::Update { kind, uuid, fields } => {
                let id = self.resolve_id(&uuid)?;
                let fields = self.resolve_fields(fields)?;
                match kind {
                    EntityKind::User => {
                        let patch: UserPatch = decode(fields)?;
                        encode(self.directory.users().update(UserId(id), patch).await?)
                    }
                    EntityKind::UserGroup => {
                        let patch: UserGroupPatch = decode(fields)?;
                        encode(
                            self.directory
                                .usergroups()
                                .update(GroupId(id), patch)
                                .await?,
                        )
                    }
                }
            }
            Command::Delete { kind, uuid } => {
                let id = self.resolve_id(&uuid)?;
                match kind {
                    EntityKind::User => self.directory.users().delete(UserId(id)).await?,
                    EntityKind::UserGroup => {
                        self.directory.usergroups().delete(GroupId(id)).await?
                    }
                }
                Ok(Value::Null)
            }
            Command::List { kind } => match kind {
                EntityKind::User => Ok(object("users", encode(self.directory.users().list().await)?)),
                EntityKind::UserGroup => Ok(object(
                    "usergroups",
                    encode(self.directory.usergroups().list().await)?,
                )),
            },
            Command::Check => {
                let violations = self.directory.check_consistency().await;
                Ok(object("violations", encode(violations)?))
            }
        }
    }

    fn resolve_id(&self, raw: &str) -> Result<Uuid, ScriptError> {
        let resolved = self.resolve_str(raw)?;
        Uuid::parse_str(&resolved).map_err(|e| ScriptError::InvalidId {
            value: resolved,
            reason: e.to_string(),
        })
    }

    fn resolve_str(&self, raw: &str) -> Result<String, ScriptError> {
        match raw.strip_prefix('@') {
            Some(name) => self
                .bindings
                .get(name)
                .map(Uuid::to_string)
                .ok_or_else(|| ScriptError::Unbound(name.to_string())),
            None => Ok(raw.to_string()),
        }
    }

    /// Substitute bindings inside the relation lists. Other fields are
    /// passed through untouched, so `"@home"` stays a plain string there.
    fn resolve_fields(&self, mut fields: Map<String, Value>) -> Result<Value, ScriptError> {
        for key in RELATION_FIELDS {
            if let Some(Value::Array(items)) = fields.get_mut(key) {
                for item in items.iter_mut() {
                    if let Value::String(s) = item {
                        *s = self.resolve_str(s)?;
                    }
                }
            }
        }
        Ok(Value::Object(fields))
    }
}

/// Fields whose entries are entity ids.
const RELATION_FIELDS: [&str; 3] = ["memberOf", "nestedGroups", "members"];

fn decode<T: DeserializeOwned>(fields: Value) -> Result<T, ScriptError> {
    serde_json::from_value(fields).map_err(|e| ScriptError::Malformed(e.to_string()))
}

fn encode<T: Serialize>(value: T) -> Result<Value, ScriptError> {
    Ok(serde_json::to_value(value)?)
}

fn object(key: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use std::io::BufReader;

    use roster_core::RosterConfig;

    use super::*;

    fn session() -> Session {
        Session::new(Directory::new(&RosterConfig::default()))
    }

    async fn ok(session: &mut Session, line: &str) -> Value {
        let response = session.execute_line(line).await;
        assert!(response.ok, "{line} failed: {:?}", response.error);
        response.result.unwrap()
    }

    async fn err(session: &mut Session, line: &str) -> ErrorBody {
        let response = session.execute_line(line).await;
        assert!(!response.ok, "{line} unexpectedly succeeded");
        response.error.unwrap()
    }

    #[test]
    fn command_parsing() {
        let command: Command =
            serde_json::from_str(r#"{"op":"list","kind":"usergroup"}"#).unwrap();
        assert_eq!(
            command,
            Command::List {
                kind: EntityKind::UserGroup
            }
        );

        let command: Command = serde_json::from_str(r#"{"op":"check"}"#).unwrap();
        assert_eq!(command.name(), "check");
    }

    #[test]
    fn response_shape() {
        let json = serde_json::to_value(Response::from(Ok(Value::Null))).unwrap();
        assert_eq!(json, serde_json::json!({"ok": true, "result": null}));

        let failure = Response::from(Err(ScriptError::Unbound("x".into())));
        let json = serde_json::to_value(failure).unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"]["kind"], "invalid_argument");
        assert!(json.get("result").is_none());
    }

    #[tokio::test]
    async fn bindings_resolve_in_uuid_and_fields() {
        let mut s = session();
        let created = ok(
            &mut s,
            r#"{"op":"create","kind":"usergroup","fields":{"shortname":"root","commonName":"Root"},"bind":"root"}"#,
        )
        .await;
        let root = created["uuid"].as_str().unwrap().to_string();

        ok(
            &mut s,
            r#"{"op":"create","kind":"usergroup","fields":{"shortname":"node1","commonName":"Node 1","memberOf":["@root"]},"bind":"node1"}"#,
        )
        .await;

        let fetched = ok(&mut s, r#"{"op":"get","kind":"usergroup","uuid":"@root"}"#).await;
        assert_eq!(fetched["uuid"], root);
        assert_eq!(fetched["nestedGroups"].as_array().unwrap().len(), 1);

        let node1 = ok(&mut s, r#"{"op":"get","kind":"usergroup","uuid":"@node1"}"#).await;
        assert_eq!(node1["memberOf"], serde_json::json!([root]));
    }

    #[tokio::test]
    async fn at_sign_in_plain_fields_is_kept_verbatim() {
        let mut s = session();
        ok(
            &mut s,
            r#"{"op":"create","kind":"usergroup","fields":{"shortname":"home","commonName":"@home"},"bind":"home"}"#,
        )
        .await;
        ok(
            &mut s,
            r#"{"op":"create","kind":"user","fields":{"fullName":"@home","memberOf":["@home"]},"bind":"u"}"#,
        )
        .await;

        let user = ok(&mut s, r#"{"op":"get","kind":"user","uuid":"@u"}"#).await;
        assert_eq!(user["fullName"], "@home");
        assert_eq!(user["memberOf"].as_array().unwrap().len(), 1);

        let group = ok(
            &mut s,
            r#"{"op":"update","kind":"usergroup","uuid":"@home","fields":{"commonName":"@nobody"}}"#,
        )
        .await;
        assert_eq!(group["commonName"], "@nobody");

        let e = err(
            &mut s,
            r#"{"op":"update","kind":"usergroup","uuid":"@home","fields":{"members":["@nobody"]}}"#,
        )
        .await;
        assert_eq!(e.kind, "invalid_argument");
        assert!(e.message.contains("@nobody"));
    }

    #[tokio::test]
    async fn list_is_wrapped_by_kind() {
        let mut s = session();
        ok(&mut s, r#"{"op":"create","kind":"user","fields":{"shortname":"jdoe"}}"#).await;

        let users = ok(&mut s, r#"{"op":"list","kind":"user"}"#).await;
        assert_eq!(users["users"].as_array().unwrap().len(), 1);
        assert_eq!(users["users"][0]["numericID"], 1000);

        let groups = ok(&mut s, r#"{"op":"list","kind":"usergroup"}"#).await;
        assert_eq!(groups, serde_json::json!({"usergroups": []}));
    }

    #[tokio::test]
    async fn failures_map_to_error_kinds() {
        let mut s = session();

        let e = err(&mut s, "not json").await;
        assert_eq!(e.kind, "invalid_argument");

        let e = err(&mut s, r#"{"op":"explode"}"#).await;
        assert_eq!(e.kind, "invalid_argument");

        let e = err(&mut s, r#"{"op":"get","kind":"user","uuid":"@nobody"}"#).await;
        assert_eq!(e.kind, "invalid_argument");
        assert!(e.message.contains("@nobody"));

        let e = err(&mut s, r#"{"op":"get","kind":"user","uuid":"1234"}"#).await;
        assert_eq!(e.kind, "invalid_argument");

        let missing = Uuid::new_v4();
        let e = err(
            &mut s,
            &format!(r#"{{"op":"delete","kind":"usergroup","uuid":"{missing}"}}"#),
        )
        .await;
        assert_eq!(e.kind, "not_found");

        let e = err(
            &mut s,
            r#"{"op":"create","kind":"usergroup","fields":{"commonName":"No Shortname"}}"#,
        )
        .await;
        assert_eq!(e.kind, "invalid_argument");
        assert!(e.message.contains("shortname"));
    }

    #[tokio::test]
    async fn update_and_check() {
        let mut s = session();
        ok(
            &mut s,
            r#"{"op":"create","kind":"usergroup","fields":{"shortname":"staff","commonName":"Staff"},"bind":"staff"}"#,
        )
        .await;
        ok(
            &mut s,
            r#"{"op":"create","kind":"user","fields":{"shortname":"alice"},"bind":"alice"}"#,
        )
        .await;

        let group = ok(
            &mut s,
            r#"{"op":"update","kind":"usergroup","uuid":"@staff","fields":{"members":["@alice"]}}"#,
        )
        .await;
        assert_eq!(group["members"].as_array().unwrap().len(), 1);

        let alice = ok(&mut s, r#"{"op":"get","kind":"user","uuid":"@alice"}"#).await;
        assert_eq!(alice["memberOf"].as_array().unwrap().len(), 1);

        let check = ok(&mut s, r#"{"op":"check"}"#).await;
        assert_eq!(check, serde_json::json!({"violations": []}));
    }

    #[tokio::test]
    async fn run_script_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tree.jsonl");
        std::fs::write(
            &path,
            [
                r#"{"op":"create","kind":"usergroup","fields":{"shortname":"root","commonName":"Root"},"bind":"root"}"#,
                "",
                r#"{"op":"create","kind":"usergroup","fields":{"shortname":"node2","commonName":"Node 2"},"bind":"node2"}"#,
                r#"{"op":"update","kind":"usergroup","uuid":"@node2","fields":{"memberOf":["@root"]}}"#,
                r#"{"op":"delete","kind":"usergroup","uuid":"@node2"}"#,
                r#"{"op":"get","kind":"usergroup","uuid":"@root"}"#,
            ]
            .join("\n"),
        )
        .unwrap();

        let mut s = session();
        let input = BufReader::new(std::fs::File::open(&path).unwrap());
        let mut output = Vec::new();
        let summary = s.run(input, &mut output, false).await.unwrap();

        assert_eq!(
            summary,
            Summary {
                executed: 5,
                failed: 0,
                stopped_early: false
            }
        );
        let lines: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[3], serde_json::json!({"ok": true, "result": null}));
        assert_eq!(lines[4]["result"]["nestedGroups"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn fail_fast_stops_at_first_error() {
        let script = [
            r#"{"op":"get","kind":"usergroup","uuid":"@missing"}"#,
            r#"{"op":"list","kind":"usergroup"}"#,
        ]
        .join("\n");

        let mut s = session();
        let mut output = Vec::new();
        let summary = s
            .run(script.as_bytes(), &mut output, true)
            .await
            .unwrap();
        assert_eq!(summary.executed, 1);
        assert_eq!(summary.failed, 1);
        assert!(summary.stopped_early);

        let mut s = session();
        let mut output = Vec::new();
        let summary = s
            .run(script.as_bytes(), &mut output, false)
            .await
            .unwrap();
        assert_eq!(summary.executed, 2);
        assert!(!summary.stopped_early);
    }
}
