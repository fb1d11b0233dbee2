//! Builtin tool families

mod background;
mod fetch;
mod files;
mod finish;
mod ltm;
mod present;
mod temporal;

pub use background::{
    BackgroundReflectTool, BackgroundResearchTool, CancelTaskTool, ListTasksTool, SetAlarmTool,
};
pub use fetch::FetchTool;
pub use files::ReadFileTool;
pub use finish::FinishTool;
pub use ltm::{
    LtmArchiveTool, LtmCreateTool, LtmEditTool, LtmGlobTool, LtmReadTool, LtmRenameTool,
    LtmReparentTool, LtmSearchTool, LtmUpdateTool, ltm_read_tools, ltm_tools,
};
pub use present::{
    AddTaskTool, CompleteTaskTool, RemoveTaskTool, SetMissionTool, SetStatusTool, present_tools,
};
pub use temporal::{MemoryContextTool, MemorySearchTool};
