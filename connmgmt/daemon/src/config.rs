// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::{Context, Result};
use connmgmt::SessionConfig;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Read the sessions to configure at startup from a JSON file holding an
/// array of session configurations.
pub fn load(path: &Path) -> Result<Vec<SessionConfig>> {
    let f = File::open(path)
        .with_context(|| format!("open config {}", path.display()))?;
    parse(BufReader::new(f))
        .with_context(|| format!("parse config {}", path.display()))
}

pub fn parse<R: Read>(r: R) -> Result<Vec<SessionConfig>> {
    Ok(serde_json::from_reader(r)?)
}
