//! Output destinations for rendered dictionaries.

use std::path::Path;

use tokio::io::AsyncWriteExt;

/// `-` selects standard output
pub fn is_stdout(path: &Path) -> bool {
    path.as_os_str() == "-"
}

/// Writes `bytes` to the file at `path`, or to stdout for `-`
pub async fn write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if is_stdout(path) {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(bytes).await?;
        stdout.write_all(b"\n").await?;
        return stdout.flush().await;
    }
    tokio::fs::write(path, bytes).await
}
