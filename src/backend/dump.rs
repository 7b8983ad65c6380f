use std::io::Write;

use crate::state::CanonicalRecord;

pub fn dump_records<W: Write>(out: &mut W, records: &[CanonicalRecord]) -> serde_json::Result<()> {
    for record in records {
        serde_json::to_writer(&mut *out, record)?;
        writeln!(out).map_err(serde_json::Error::io)?;
    }
    Ok(())
}
