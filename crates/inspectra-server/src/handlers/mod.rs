// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP handlers, one module per route group.

pub mod cron;
pub mod health;
pub mod instances;
pub mod objects;
pub mod push;
pub mod signatures;
pub mod webhooks;
