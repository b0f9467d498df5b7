pub mod changes;
pub mod checker;
pub mod collab;
pub mod files;
pub mod impact;
pub mod patch;
pub mod reexpand;
pub mod scoped;
pub mod updater;
pub mod validation;

pub use changes::{
    detect_changes, detect_changes_from_commit, get_current_commit, repo_state_hash, ChangeKind,
    ChangeSet, DetectedChange,
};
pub use collab::{ComponentExpander, NewFileClassifier};
pub use impact::{analyze_impact, ChangeImpact, UpdateAction};
pub use updater::IncrementalUpdater;
