use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{LineProblem, SessionStoreError};
use crate::paths::{is_session_file_for, session_file_name, session_root};
use crate::schema::{Checkpoint, JsonLine, SessionEntry, SessionEntryKind, SessionHeader};

pub struct SessionStore {
    path: PathBuf,
    file: File,
    header: SessionHeader,
    entries: Vec<SessionEntry>,
    index_by_id: HashMap<String, usize>,
    current_leaf_id: Option<String>,
}

impl SessionStore {
    /// Creates a new session file for `conversation_id` under `cwd`.
    pub fn create_new(cwd: &Path, conversation_id: &str) -> Result<Self, SessionStoreError> {
        if conversation_id.trim().is_empty() {
            return Err(SessionStoreError::EmptyConversationId);
        }
        if !cwd.is_absolute() {
            return Err(SessionStoreError::RelativeCwd {
                path: cwd.to_path_buf(),
            });
        }

        let root = session_root(cwd);
        fs::create_dir_all(&root)
            .map_err(|source| SessionStoreError::io("creating session root", &root, source))?;

        let created_at = now_rfc3339()?;
        let header = SessionHeader::v1(conversation_id, created_at.clone(), cwd.display().to_string());
        let path = root.join(session_file_name(&created_at, conversation_id));

        let mut file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)
            .map_err(|source| SessionStoreError::io("creating session file", &path, source))?;
        let line = serde_json::to_string(&header)
            .map_err(|source| SessionStoreError::encode(&path, source))?;
        writeln!(file, "{line}")
            .and_then(|()| file.flush())
            .map_err(|source| SessionStoreError::io("writing session header", &path, source))?;

        Ok(Self {
            path,
            file,
            header,
            entries: Vec::new(),
            index_by_id: HashMap::new(),
            current_leaf_id: None,
        })
    }

    pub fn open(path: &Path) -> Result<Self, SessionStoreError> {
        let path = path.to_path_buf();
        let read_file = File::open(&path)
            .map_err(|source| SessionStoreError::io("opening session file", &path, source))?;
        let reader = BufReader::new(read_file);

        let mut header: Option<SessionHeader> = None;
        let mut entries_with_lines: Vec<(usize, SessionEntry)> = Vec::new();
        let mut index_by_id = HashMap::new();

        for (line_index, line_result) in reader.lines().enumerate() {
            let line_number = line_index + 1;
            let line = line_result
                .map_err(|source| {
                    SessionStoreError::corrupt(&path, line_number, LineProblem::Read(source))
                })?;
            if line.trim().is_empty() {
                continue;
            }
            let parsed = parse_json_line(&path, line_number, &line)?;

            if header.is_none() {
                match parsed {
                    JsonLine::Session(parsed_header) => {
                        validate_header_line(&path, line_number, &parsed_header)?;
                        header = Some(parsed_header);
                    }
                    JsonLine::Entry(_) => {
                        return Err(SessionStoreError::corrupt(
                            path,
                            line_number,
                            LineProblem::ExpectedHeader,
                        ));
                    }
                }

                continue;
            }

            match parsed {
                JsonLine::Session(_) => {
                    return Err(SessionStoreError::corrupt(
                        path,
                        line_number,
                        LineProblem::ExpectedEntry,
                    ));
                }
                JsonLine::Entry(entry) => {
                    validate_entry_line(&path, line_number, &entry)?;
                    if index_by_id.contains_key(&entry.id) {
                        return Err(SessionStoreError::corrupt(
                            path,
                            line_number,
                            LineProblem::DuplicateEntryId(entry.id),
                        ));
                    }

                    let next_index = entries_with_lines.len();
                    index_by_id.insert(entry.id.clone(), next_index);
                    entries_with_lines.push((line_number, entry));
                }
            }
        }

        let header =
            header.ok_or_else(|| SessionStoreError::MissingHeader { path: path.clone() })?;
        validate_entry_graph(&path, &entries_with_lines, &index_by_id)?;

        let entries = entries_with_lines
            .into_iter()
            .map(|(_, entry)| entry)
            .collect::<Vec<_>>();
        let current_leaf_id = entries.last().map(|entry| entry.id.clone());

        let file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|source| {
                SessionStoreError::io("opening session file for append", &path, source)
            })?;

        Ok(Self {
            path,
            file,
            header,
            entries,
            index_by_id,
            current_leaf_id,
        })
    }

    /// Newest session file for `conversation_id` under `cwd`.
    ///
    /// File names start with the sanitized creation timestamp, so the
    /// lexicographically greatest name is the newest.
    pub fn latest_session_path(
        cwd: &Path,
        conversation_id: &str,
    ) -> Result<PathBuf, SessionStoreError> {
        let root = session_root(cwd);
        let no_sessions = || SessionStoreError::NoSessionsFound {
            root: root.clone(),
            conversation_id: conversation_id.to_string(),
        };

        let read_dir = match fs::read_dir(&root) {
            Ok(read_dir) => read_dir,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                return Err(no_sessions());
            }
            Err(source) => {
                return Err(SessionStoreError::io("listing session root", &root, source));
            }
        };

        let mut newest: Option<(String, PathBuf)> = None;
        for dir_entry in read_dir {
            let dir_entry = dir_entry
                .map_err(|source| SessionStoreError::io("listing session root", &root, source))?;
            let file_name = dir_entry.file_name().to_string_lossy().into_owned();
            if !is_session_file_for(&file_name, conversation_id) {
                continue;
            }
            let is_newer = newest
                .as_ref()
                .map_or(true, |(current, _)| file_name > *current);
            if is_newer {
                newest = Some((file_name, dir_entry.path()));
            }
        }

        newest.map(|(_, path)| path).ok_or_else(no_sessions)
    }

    /// Opens the newest session file for `conversation_id`.
    pub fn open_latest(cwd: &Path, conversation_id: &str) -> Result<Self, SessionStoreError> {
        let path = Self::latest_session_path(cwd, conversation_id)?;
        Self::open(&path)
    }

    /// Opens the newest session for `conversation_id`, creating one if none exist.
    pub fn open_or_create(cwd: &Path, conversation_id: &str) -> Result<Self, SessionStoreError> {
        match Self::open_latest(cwd, conversation_id) {
            Err(SessionStoreError::NoSessionsFound { .. }) => Self::create_new(cwd, conversation_id),
            other => other,
        }
    }

    /// Appends a fully formed entry after validating it against the graph.
    pub fn append(&mut self, entry: SessionEntry) -> Result<(), SessionStoreError> {
        let line_number = self.entries.len() + 2;
        validate_entry_line(&self.path, line_number, &entry)?;
        if self.index_by_id.contains_key(&entry.id) {
            return Err(SessionStoreError::corrupt(
                &self.path,
                line_number,
                LineProblem::DuplicateEntryId(entry.id),
            ));
        }
        if let Some(parent_id) = &entry.parent_id {
            if !self.index_by_id.contains_key(parent_id) {
                return Err(SessionStoreError::corrupt(
                    &self.path,
                    line_number,
                    LineProblem::DanglingParent {
                        entry_id: entry.id.clone(),
                        parent_id: parent_id.clone(),
                    },
                ));
            }
        }

        let line = serde_json::to_string(&entry)
            .map_err(|source| SessionStoreError::encode(&self.path, source))?;
        writeln!(self.file, "{line}")
            .and_then(|()| self.file.flush())
            .map_err(|source| SessionStoreError::io("appending session entry", &self.path, source))?;

        self.index_by_id.insert(entry.id.clone(), self.entries.len());
        self.current_leaf_id = Some(entry.id.clone());
        self.entries.push(entry);
        Ok(())
    }

    /// Appends `kind` as a child of the current leaf with a fresh id and
    /// timestamp, returning the new entry id.
    pub fn append_kind(&mut self, kind: SessionEntryKind) -> Result<String, SessionStoreError> {
        let id = Uuid::new_v4().to_string();
        let entry = SessionEntry::new(id.clone(), self.current_leaf_id.clone(), now_rfc3339()?, kind);
        self.append(entry)?;
        Ok(id)
    }

    pub fn append_prompt(
        &mut self,
        run_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<String, SessionStoreError> {
        self.append_kind(SessionEntryKind::Prompt {
            run_id: run_id.into(),
            text: text.into(),
        })
    }

    pub fn append_checkpoint(
        &mut self,
        run_id: impl Into<String>,
        continuation_token: Option<String>,
        tree: Value,
    ) -> Result<String, SessionStoreError> {
        self.append_kind(SessionEntryKind::Checkpoint {
            run_id: run_id.into(),
            continuation_token,
            tree,
        })
    }

    /// Most recently appended checkpoint, if any.
    #[must_use]
    pub fn latest_checkpoint(&self) -> Option<Checkpoint> {
        self.entries.iter().rev().find_map(Checkpoint::from_entry)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn header(&self) -> &SessionHeader {
        &self.header
    }

    #[must_use]
    pub fn conversation_id(&self) -> &str {
        &self.header.conversation_id
    }

    #[must_use]
    pub fn entries(&self) -> &[SessionEntry] {
        &self.entries
    }

    #[must_use]
    pub fn current_leaf_id(&self) -> Option<&str> {
        self.current_leaf_id.as_deref()
    }
}

fn now_rfc3339() -> Result<String, SessionStoreError> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(SessionStoreError::from)
}

fn parse_json_line(
    path: &Path,
    line_number: usize,
    line: &str,
) -> Result<JsonLine, SessionStoreError> {
    let json_error =
        |source| SessionStoreError::corrupt(path, line_number, LineProblem::Json(source));
    let value = serde_json::from_str::<Value>(line).map_err(json_error)?;
    let record_type = value.get("type").and_then(Value::as_str).map(str::to_owned);

    match record_type.as_deref() {
        Some("session") => serde_json::from_value::<SessionHeader>(value)
            .map(JsonLine::Session)
            .map_err(json_error),
        Some("entry") => serde_json::from_value::<SessionEntry>(value)
            .map(JsonLine::Entry)
            .map_err(json_error),
        _ => Err(SessionStoreError::corrupt(
            path,
            line_number,
            LineProblem::UnknownRecordType(record_type),
        )),
    }
}

fn validate_header_line(
    path: &Path,
    line_number: usize,
    header: &SessionHeader,
) -> Result<(), SessionStoreError> {
    if header.version != 1 {
        return Err(SessionStoreError::corrupt(
            path,
            line_number,
            LineProblem::UnsupportedVersion(header.version),
        ));
    }

    validate_rfc3339(path, line_number, "created_at", &header.created_at)?;

    if !Path::new(&header.cwd).is_absolute() {
        return Err(SessionStoreError::corrupt(
            path,
            line_number,
            LineProblem::RelativeCwd(header.cwd.clone()),
        ));
    }

    Ok(())
}

fn validate_entry_line(
    path: &Path,
    line_number: usize,
    entry: &SessionEntry,
) -> Result<(), SessionStoreError> {
    validate_rfc3339(path, line_number, "ts", &entry.ts)
}

fn validate_entry_graph(
    path: &Path,
    entries_with_lines: &[(usize, SessionEntry)],
    index_by_id: &HashMap<String, usize>,
) -> Result<(), SessionStoreError> {
    for (line_number, entry) in entries_with_lines {
        if let Some(parent_id) = &entry.parent_id {
            if !index_by_id.contains_key(parent_id) {
                return Err(SessionStoreError::corrupt(
                    path,
                    *line_number,
                    LineProblem::DanglingParent {
                        entry_id: entry.id.clone(),
                        parent_id: parent_id.clone(),
                    },
                ));
            }
        }
    }

    Ok(())
}

fn validate_rfc3339(
    path: &Path,
    line_number: usize,
    field: &'static str,
    value: &str,
) -> Result<(), SessionStoreError> {
    if OffsetDateTime::parse(value, &Rfc3339).is_err() {
        return Err(SessionStoreError::corrupt(
            path,
            line_number,
            LineProblem::InvalidTimestamp {
                field,
                value: value.to_string(),
            },
        ));
    }

    Ok(())
}
