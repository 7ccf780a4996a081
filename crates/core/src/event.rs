//! Change events and the handler capability the watcher dispatches to

use std::path::PathBuf;

use notify::EventKind;
use notify::event::{ModifyKind, RenameMode};

use crate::error::Result;

/// Kind of filesystem operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeOp {
    Create,
    Write,
    Remove,
    /// Rename whose direction the backend didn't report
    Rename,
    /// Path a rename moved away from
    RenameFrom,
    /// Path a rename moved to
    RenameTo,
    /// Permission or other metadata-only change
    Chmod,
}

impl ChangeOp {
    /// Map a notify event kind. Access events carry no change and map to `None`.
    ///
    /// `RenameMode::Both` maps to `Rename`; [`ChangeEvent::from_notify`] splits
    /// it into its two directions.
    #[must_use]
    pub fn from_kind(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::Access(_) => None,
            EventKind::Create(_) => Some(Self::Create),
            EventKind::Remove(_) => Some(Self::Remove),
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(Self::RenameFrom),
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(Self::RenameTo),
            EventKind::Modify(ModifyKind::Name(_)) => Some(Self::Rename),
            EventKind::Modify(ModifyKind::Metadata(_)) => Some(Self::Chmod),
            EventKind::Modify(_) | EventKind::Any | EventKind::Other => Some(Self::Write),
        }
    }
}

/// One operation on one path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub op: ChangeOp,
}

impl ChangeEvent {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, op: ChangeOp) -> Self {
        Self {
            path: path.into(),
            op,
        }
    }

    /// Split a notify event into one change event per path.
    ///
    /// A two-path rename becomes `RenameFrom` for the first path and
    /// `RenameTo` for the second.
    #[must_use]
    pub fn from_notify(event: notify::Event) -> Vec<Self> {
        if event.kind == EventKind::Modify(ModifyKind::Name(RenameMode::Both)) {
            return event
                .paths
                .into_iter()
                .enumerate()
                .map(|(index, path)| Self {
                    path,
                    op: if index == 0 {
                        ChangeOp::RenameFrom
                    } else {
                        ChangeOp::RenameTo
                    },
                })
                .collect();
        }

        let Some(op) = ChangeOp::from_kind(&event.kind) else {
            return Vec::new();
        };
        event
            .paths
            .into_iter()
            .map(|path| Self { path, op })
            .collect()
    }
}

/// Something the watcher calls for every event, in registration order.
///
/// A returned error is logged by the dispatcher and does not stop later
/// handlers or later events.
pub trait EventHandler: Send + Sync {
    /// Handle one change event
    ///
    /// # Errors
    /// Any error is logged by the dispatcher.
    fn handle(&self, event: &ChangeEvent) -> Result<()>;
}

impl<F> EventHandler for F
where
    F: Fn(&ChangeEvent) -> Result<()> + Send + Sync,
{
    fn handle(&self, event: &ChangeEvent) -> Result<()> {
        self(event)
    }
}
