// SPDX-License-Identifier: GPL-3.0-or-later

//! Demonstrates the `thread` spawn path end to end: a master registers
//! an AUTO state variable, spawns a thread slave, registers the same
//! tag on the slave's own in-process coordinator, writes new bytes into
//! the master's buffer, and pushes one frame. Run with
//! `RUST_LOG=info cargo run --bin thread_slave_demo`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use ve::coordinator::{Coordinator, StateVar, StateVarFlags};

fn main() -> Result<()> {
    let _guard = ve::logging::init("/tmp/ve-demo-logs", Default::default())
        .context("failed to initialize logging")?;

    let master = Coordinator::new_master_for_tests();
    let id = master
        .get_slave("auto", "auto", false)
        .context("spawning thread slave")?;
    info!(id, "spawned thread slave");

    let master_buf = Arc::new(Mutex::new(vec![0u8; 8]));
    let slave_buf = Arc::new(Mutex::new(vec![0u8; 8]));

    master
        .add_state_var(StateVar::from_shared(1, master_buf.clone(), StateVarFlags::AUTO))
        .context("registering master state var")?;

    let slave = master
        .thread_slave_handle(id)
        .context("thread slave has no coordinator handle")?;
    slave
        .add_state_var(StateVar::from_shared(1, slave_buf.clone(), StateVarFlags::AUTO))
        .context("registering slave state var")?;

    for (i, byte) in master_buf.lock().unwrap().iter_mut().enumerate() {
        *byte = (i * 2 + 1) as u8;
    }

    master.push_frame().context("pushing frame")?;
    std::thread::sleep(Duration::from_millis(100));

    info!(
        master = ?*master_buf.lock().unwrap(),
        slave = ?*slave_buf.lock().unwrap(),
        "state after one frame push"
    );

    master.shutdown();
    Ok(())
}
