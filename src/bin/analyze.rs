//! Emits a CSV report of per-entry stream/raw/decompressed SHA-1 digests
//! for one zip file, without exploding it.

use std::fs::File;
use std::io::{stdout, Read, Seek, SeekFrom};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use xzip::exploder::locate_eocd;
use xzip::hashes::hash_entry;
use xzip::zip_records::CentralDirectoryEntry;

#[derive(Parser, Debug)]
#[command(about = "Reports per-entry hashes for a zip file as CSV")]
struct Cli {
    /// Zip file to analyze.
    file: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut file = File::open(&cli.file)
        .with_context(|| format!("opening {}", cli.file.display()))?;

    let Some(eocd) = locate_eocd(&mut file)? else {
        return Ok(());
    };

    let mut writer = csv::Writer::from_writer(stdout());
    writer.write_record(["Filename", "Stream Hash", "Raw Hash", "Decompressed Hash"])?;

    file.seek(SeekFrom::Start(eocd.directory_offset as u64))?;
    for _ in 0..eocd.total_entries {
        let mut cde_buf = vec![0u8; CentralDirectoryEntry::SIZE];
        file.read_exact(&mut cde_buf)?;
        let cde = CentralDirectoryEntry::read(&mut std::io::Cursor::new(&cde_buf))?;

        let hashes = hash_entry(&mut file, &cde)?;
        writer.write_record([
            &hashes.filename,
            &hashes.stream_hash,
            &hashes.raw_hash,
            &hashes.decompressed_hash,
        ])?;

        let trailer_len =
            cde.filename_len as usize + cde.extra_field_len as usize + cde.comment_len as usize;
        file.seek(SeekFrom::Current(trailer_len as i64))?;
    }
    writer.flush()?;
    Ok(())
}
