// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod judge;
mod mock;
mod provider;
mod registry;
mod retry;
mod types;

pub use judge::{parse_judge_verdict, JudgeVerdict};
pub use mock::{MockProvider, ScriptedMockProvider};
pub use provider::ModelProvider;
pub use registry::{from_config, register_driver, DriverFactory};
pub use retry::complete_with_retry;
pub use types::*;
