//! Local socket that sessions poke to say they are still in use.

use std::fs;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use tokio::io::AsyncReadExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::error::Result;

pub const SOCKET_NAME: &str = "sessionender";

/// Per-user namespace directory the socket lives in.
pub fn default_socket_dir(user: &str) -> PathBuf {
    PathBuf::from(format!("/tmp/ns.{}.:0", user))
}

pub struct KeepAlive {
    listener: UnixListener,
    path: PathBuf,
}

impl KeepAlive {
    /// Binds `<dir>/sessionender`, replacing any stale socket, and opens it
    /// up to every local user.
    pub fn bind(dir: &Path) -> Result<Self> {
        if !dir.exists() {
            fs::DirBuilder::new().recursive(true).mode(0o777).create(dir)?;
        }
        let path = dir.join(SOCKET_NAME);
        if fs::symlink_metadata(&path).is_ok() {
            debug!("removing stale {}", path.display());
            fs::remove_file(&path)?;
        }

        let listener = UnixListener::bind(&path)?;
        if let Err(e) = fs::set_permissions(&path, fs::Permissions::from_mode(0o666)) {
            let _ = fs::remove_file(&path);
            return Err(e.into());
        }
        info!("listening for keep-alives on {}", path.display());
        Ok(Self { listener, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accepts connections until the listener fails, relaying activity on
    /// each one to `activity`. The socket file goes away with the loop.
    pub fn spawn(self, activity: UnboundedSender<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match self.listener.accept().await {
                    Ok((conn, _)) => {
                        tokio::spawn(relay(conn, activity.clone()));
                    }
                    Err(e) => {
                        warn!("keep-alive accept failed: {}", e);
                        break;
                    }
                }
            }
            let _ = fs::remove_file(&self.path);
        })
    }
}

/// Any successful read is one activity signal; EOF or an error ends it.
async fn relay(mut conn: UnixStream, activity: UnboundedSender<()>) {
    let mut buf = [0u8; 4];
    loop {
        match conn.read(&mut buf).await {
            Ok(0) => return,
            Ok(_) => {
                if activity.send(()).is_err() {
                    return;
                }
            }
            Err(e) => {
                debug!("keep-alive connection ended: {}", e);
                return;
            }
        }
    }
}
