use std::path::PathBuf;

/// Kind of filesystem change, after classification of the raw notify event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Modified,
    Created,
    Deleted,
    Renamed,
}

/// A single change to one path under the watched root. Consumed once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
}
