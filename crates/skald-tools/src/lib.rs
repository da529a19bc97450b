// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod dispatch;
mod registry;
mod shell;
mod tool;

pub mod builtin;

pub use builtin::ShellControls;
pub use dispatch::Dispatcher;
pub use registry::ToolRegistry;
pub use shell::{JobStarted, ShellControl, ShellOptions, ShellOutcome, ShellRunner};
pub use tool::{
    resolve_path, AllowAll, AuthDecision, AuthRequest, Authorizer, DomainPolicy, ExecMetadata,
    Tool, ToolCall, ToolContext, ToolOutput,
};
