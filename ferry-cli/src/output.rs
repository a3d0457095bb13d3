use std::io::Write;

use anyhow::Result;
use ferry_engine::UploadResult;
use serde::Serialize;
use storage_driver::DriverDescription;

#[derive(Serialize)]
struct DriverListing<'a> {
    storage_drivers: &'a [DriverDescription],
}

pub fn render_result(result: &UploadResult) -> Result<String> {
    Ok(serde_json::to_string(result)?)
}

pub fn render_drivers(drivers: &[DriverDescription]) -> Result<String> {
    Ok(serde_json::to_string(&DriverListing {
        storage_drivers: drivers,
    })?)
}

/// One line on stdout; nothing else is ever written there.
pub fn print_line(line: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{line}")?;
    stdout.flush()?;
    Ok(())
}
