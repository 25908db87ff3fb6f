#![allow(dead_code)]

use async_compression::tokio::bufread::{DeflateEncoder, GzipEncoder};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;

pub const METHOD_STORED: u16 = 0;
pub const METHOD_DEFLATE: u16 = 8;

/// A small regular model: 4 x 3 x 2 blocks of 10 m, x fastest.
pub fn regular_model() -> String {
    let mut s = String::from("xc,yc,zc,au,cu,density,domain\n");
    let mut n = 0u32;
    for z in 0..2 {
        for y in 0..3 {
            for x in 0..4 {
                let au = (n % 7) as f64 * 0.5;
                let domain = if z == 0 { "OX" } else { "FR" };
                s.push_str(&format!(
                    "{},{},{},{au},{},2.7,{domain}\n",
                    x * 10 + 5,
                    y * 10 + 5,
                    z * 10 + 5,
                    n % 3
                ));
                n += 1;
            }
        }
    }
    s
}

pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> anyhow::Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, bytes)?;
    Ok(path)
}

pub async fn deflate(data: &[u8]) -> anyhow::Result<Vec<u8>> {
    let mut out = Vec::new();
    DeflateEncoder::new(data).read_to_end(&mut out).await?;
    Ok(out)
}

pub async fn gzip(data: &[u8]) -> anyhow::Result<Vec<u8>> {
    let mut out = Vec::new();
    GzipEncoder::new(data).read_to_end(&mut out).await?;
    Ok(out)
}

/// Build a ZIP container holding `entries` as `(name, data, method)`.
pub async fn zip_container(entries: &[(&str, &[u8], u16)]) -> anyhow::Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut central = Vec::new();
    for (name, data, method) in entries {
        let crc = crc32fast::hash(data);
        let body = match *method {
            METHOD_DEFLATE => deflate(data).await?,
            _ => data.to_vec(),
        };
        let offset = out.len() as u32;

        out.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
        out.extend_from_slice(&20u16.to_le_bytes()); // version needed
        out.extend_from_slice(&0u16.to_le_bytes()); // flags
        out.extend_from_slice(&method.to_le_bytes());
        out.extend_from_slice(&[0, 0, 0, 0]); // time, date
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(&body);

        central.extend_from_slice(&0x0201_4b50u32.to_le_bytes());
        central.extend_from_slice(&20u16.to_le_bytes()); // version made by
        central.extend_from_slice(&20u16.to_le_bytes()); // version needed
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&method.to_le_bytes());
        central.extend_from_slice(&[0, 0, 0, 0]);
        central.extend_from_slice(&crc.to_le_bytes());
        central.extend_from_slice(&(body.len() as u32).to_le_bytes());
        central.extend_from_slice(&(data.len() as u32).to_le_bytes());
        central.extend_from_slice(&(name.len() as u16).to_le_bytes());
        central.extend_from_slice(&[0u8; 12]); // extra, comment, disk, attributes
        central.extend_from_slice(&offset.to_le_bytes());
        central.extend_from_slice(name.as_bytes());
    }

    let cd_offset = out.len() as u32;
    out.extend_from_slice(&central);
    out.extend_from_slice(&0x0605_4b50u32.to_le_bytes());
    out.extend_from_slice(&[0, 0, 0, 0]); // disk numbers
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    out.extend_from_slice(&(central.len() as u32).to_le_bytes());
    out.extend_from_slice(&cd_offset.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    Ok(out)
}
