// SPDX-License-Identifier: MIT

pub mod agents;
pub mod flow;
pub mod llm;
pub mod server;
