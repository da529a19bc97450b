// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod edit_file;
mod list_dir;
mod read_file;
mod shell;
mod web_fetch;
mod write_file;

pub use edit_file::EditFileTool;
pub use list_dir::ListDirTool;
pub use read_file::ReadFileTool;
pub use shell::{JobStatusTool, ShellControls, ShellTool, StopJobTool};
pub use web_fetch::{extract_domain, WebFetchTool};
pub use write_file::WriteFileTool;

use std::sync::Arc;
use std::time::Duration;

use crate::{ShellRunner, ToolRegistry};

/// Register the standard toolset.
///
/// Returns the control handle through which a frontend can move an
/// in-flight shell call to the background.
pub fn register_standard_tools(
    registry: &mut ToolRegistry,
    shell_timeout: Duration,
) -> ShellControls {
    let runner = Arc::new(ShellRunner::default());
    let controls = ShellControls::default();
    registry.register(ShellTool::new(
        Arc::clone(&runner),
        shell_timeout,
        controls.clone(),
    ));
    registry.register(JobStatusTool);
    registry.register(StopJobTool::new(runner));
    registry.register(ReadFileTool);
    registry.register(WriteFileTool);
    registry.register(EditFileTool);
    registry.register(ListDirTool);
    registry.register(WebFetchTool::default());
    controls
}
