// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Best-effort host tuning performed once at startup, before the listener
//! binds: disable the RT runtime throttle and pin the generator's core to
//! the `performance` CPU frequency governor. Both are fatal on failure —
//! a generator that can't get real-time scheduling or a stable clock isn't
//! worth running in degraded form.

use crate::error::ConfigError;
use std::fs;

const RT_RUNTIME_PATH: &str = "/proc/sys/kernel/sched_rt_runtime_us";
const GOVERNOR_PATH: &str = "/sys/devices/system/cpu/cpu3/cpufreq/scaling_governor";

pub fn tune_host() -> Result<(), ConfigError> {
    write_one(RT_RUNTIME_PATH, "-1")?;
    write_one(GOVERNOR_PATH, "performance")?;
    Ok(())
}

fn write_one(path: &str, contents: &str) -> Result<(), ConfigError> {
    fs::write(path, contents).map_err(|source| ConfigError::HostTuning {
        path: path.to_string(),
        source,
    })
}
