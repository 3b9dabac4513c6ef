// SPDX-License-Identifier: Apache-2.0

pub mod agent;
pub mod args;
pub mod config;
pub mod journald_receiver;
pub mod parse;
pub mod wait;
