use std::fs;
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use log::debug;
use regex::bytes::Regex;

use crate::error::{Error, Result};

const FOOTER: &str = "#---";

fn header(name: &str) -> String {
    format!("#-- cloudnode {} --", name)
}

fn block(name: &str, ip: &str) -> String {
    format!(
        "\n{header}\n\
         Host {name}\n\
         \tHostName {ip}\n\
         \tControlPath ~/.ssh/controlmasters/{name}-%r@%h:%p\n\
         \tControlMaster auto\n\
         \tControlPersist yes\n\
         \tCheckHostIP=no\n\
         \tStrictHostKeyChecking no\n\
         {footer}\n",
        header = header(name),
        name = name,
        ip = ip,
        footer = FOOTER,
    )
}

/// Returns `contents` with the block for `name` replaced, or appended if
/// there isn't one yet.
pub fn splice_block(contents: &[u8], name: &str, ip: &str) -> Result<Vec<u8>> {
    let pattern = format!(
        r"(?s)\n?{}.*?{}\n?",
        regex::escape(&header(name)),
        regex::escape(FOOTER)
    );
    let re = Regex::new(&pattern).map_err(|e| Error::Settings(e.to_string()))?;
    let block = block(name, ip);

    let mut out = Vec::with_capacity(contents.len() + block.len());
    match re.find(contents) {
        Some(m) => {
            out.extend_from_slice(&contents[..m.start()]);
            out.extend_from_slice(block.as_bytes());
            out.extend_from_slice(&contents[m.end()..]);
        }
        None => {
            out.extend_from_slice(contents);
            out.extend_from_slice(block.as_bytes());
        }
    }
    Ok(out)
}

/// Updates `ssh_file` in place with the alias block for `name`. A missing
/// file is created.
pub fn insert_name_block(ssh_file: &Path, name: &str, ip: &str) -> Result<()> {
    let contents = fs::read(ssh_file).unwrap_or_default();
    let updated = splice_block(&contents, name, ip)?;

    let tmp = with_suffix(ssh_file, ".tmp");
    let written = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(&tmp)
        .and_then(|mut f| f.write_all(&updated).and_then(|_| f.sync_all()));
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }

    let res = safe_replace_file(&tmp, ssh_file);
    let _ = fs::remove_file(&tmp);
    res
}

/// Moves `new_path` over `old_path`, keeping a hard-linked backup of the old
/// file until the new one is in place.
pub fn safe_replace_file(new_path: &Path, old_path: &Path) -> Result<()> {
    let backup = with_suffix(old_path, ".back");

    if old_path.exists() {
        let _ = fs::remove_file(&backup);
        fs::hard_link(old_path, &backup)?;
        fs::remove_file(old_path)?;
    }
    fs::hard_link(new_path, old_path)?;
    fs::remove_file(new_path)?;
    if backup.exists() {
        fs::remove_file(&backup)?;
    }
    Ok(())
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// Adds an ssh alias for a freshly made node to `~/.ssh/config`.
pub fn add_ssh_alias(name: &str, ip: &str) -> Result<()> {
    let ssh_dir = PathBuf::from(shellexpand::tilde("~/.ssh").into_owned());
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(ssh_dir.join("controlmasters"))?;
    let config = ssh_dir.join("config");
    debug!("adding {} ({}) to {}", name, ip, config.display());
    insert_name_block(&config, name, ip)
}
