//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![cfg_attr(
    feature = "testing",
    allow(dead_code, unused_variables, unused_imports)
)]

pub mod adjacency;
pub mod collections;
pub mod debug;
pub mod error;
pub mod events;
pub mod fsm;
pub mod instance;
pub mod interface;
pub mod network;
pub mod packet;
pub mod route;
pub mod spf;
pub mod tasks;
pub mod tiedb;
pub mod ztp;
