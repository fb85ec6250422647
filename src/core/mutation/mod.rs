// ─── Mutation Engine ───
// add / remove / enable / disable / purge / sync / repair, built from the
// manifest store, scanner, reconciler, resolvers and lifecycle guard.
// File steps are individually atomic and the manifest is written last.

mod engine;
mod repair;
mod state;

pub use engine::{
    AddRequest, InitOptions, InitReport, ModsEngine, PurgeOptions, PurgeReport, RemoveMode,
    RemoveReport, StatusReport, SyncReport, ToggleReport,
};
pub use repair::{plan_repair, unique_id, RepairAction, RepairConflict, RepairPlan};
pub use state::ModState;
