//! Subcommand implementations.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use bytes::Bytes;
use chrono::{DateTime, Local};
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use webindex_kernel::{Download, DownloadService, Node, NodeInfo, VfsResult, sort_listing};

type Body = BoxStream<'static, VfsResult<Bytes>>;

pub async fn mounts(service: &DownloadService) -> Result<()> {
    let mut out = String::new();
    for mount in service.resolver().mounts().iter() {
        out.push_str(&format!(
            "{}\t{}\t{}\n",
            mount.name(),
            mount.root().display(),
            mount.accel_base().unwrap_or("-")
        ));
    }
    print!("{out}");
    Ok(())
}

pub async fn ls(service: &DownloadService, path: &str, json: bool) -> Result<()> {
    let node = service.resolver().navigate(path).await?;
    let mut nodes = if node.is_directory() {
        node.iterate_children().await?
    } else {
        vec![node]
    };
    sort_listing(&mut nodes);

    if json {
        let infos: Vec<NodeInfo> = nodes.iter().map(Node::info).collect();
        println!("{}", serde_json::to_string_pretty(&infos)?);
    } else {
        for node in &nodes {
            println!("{}", listing_line(node));
        }
    }
    Ok(())
}

pub async fn stat(service: &DownloadService, path: &str, json: bool) -> Result<()> {
    let node = service.resolver().navigate(path).await?;
    let crumbs = node.breadcrumbs().await;

    if json {
        let value = serde_json::json!({
            "node": node.info(),
            "breadcrumbs": crumbs.iter().map(Node::info).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let info = node.info();
    println!("path:     /{}", info.virtual_path);
    println!("kind:     {:?}", info.kind);
    println!("size:     {}", info.size);
    println!("modified: {}", node.modified().map(format_time).unwrap_or_else(|| "-".into()));
    println!("class:    {}", info.mime_class);
    if let Some(mime) = &info.mime_type {
        println!("type:     {mime}");
    }
    if let Some(accel) = node.accel_redirect_path() {
        println!("accel:    {accel}");
    }
    println!("crumbs:   {}", breadcrumb_trail(&crumbs));
    Ok(())
}

pub async fn get(service: &DownloadService, path: &str, output: Option<PathBuf>) -> Result<()> {
    let download = service.file(path).await?;
    if let Download::Redirect { accel_path, .. } = &download {
        // Nothing to stream; print what a proxy would be handed.
        println!("Content-Type: {}", download.content_type());
        println!("Content-Disposition: {}", download.content_disposition());
        println!("X-Accel-Redirect: {accel_path}");
        return Ok(());
    }
    deliver(download, output).await
}

pub async fn zip(service: &DownloadService, path: &str, output: Option<PathBuf>) -> Result<()> {
    let cancel = CancellationToken::new();
    let download = service.archive(path, &cancel).await?;
    deliver(download, output).await
}

async fn deliver(download: Download, output: Option<PathBuf>) -> Result<()> {
    let filename = download.filename().to_string();
    let Some(body) = download.into_body() else {
        return Ok(());
    };

    match output {
        Some(path) => {
            let mut file = tokio::fs::File::create(&path)
                .await
                .with_context(|| format!("creating {}", path.display()))?;
            match copy_body(body, &mut file).await {
                Ok(bytes) => {
                    tracing::info!(file = %filename, bytes, output = %path.display(), "Download complete");
                    Ok(())
                }
                Err(e) => {
                    discard_partial(&path).await;
                    Err(e)
                }
            }
        }
        None => {
            let mut stdout = tokio::io::stdout();
            let bytes = copy_body(body, &mut stdout).await?;
            tracing::info!(file = %filename, bytes, "Download complete");
            Ok(())
        }
    }
}

/// Write every chunk of `body` to `out`; a failed chunk aborts the copy.
async fn copy_body<W: AsyncWrite + Unpin>(mut body: Body, out: &mut W) -> Result<u64> {
    let mut total = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.context("transfer aborted")?;
        out.write_all(&chunk).await.context("writing output")?;
        total += chunk.len() as u64;
    }
    out.flush().await.context("flushing output")?;
    Ok(total)
}

async fn discard_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!(output = %path.display(), error = %e, "Could not remove partial download");
    }
}

fn listing_line(node: &Node) -> String {
    let modified = node.modified().map(format_time).unwrap_or_else(|| "-".into());
    if node.is_directory() {
        format!("{:>8}  {modified:16}  {}/", "-", node.name())
    } else {
        format!("{:>8}  {modified:16}  {}", human_size(node.size()), node.name())
    }
}

fn breadcrumb_trail(crumbs: &[Node]) -> String {
    let names: Vec<&str> = crumbs
        .iter()
        .map(|n| if n.name().is_empty() { "/" } else { n.name() })
        .collect();
    names.join(" > ")
}

fn format_time(t: SystemTime) -> String {
    DateTime::<Local>::from(t).format("%Y-%m-%d %H:%M").to_string()
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "K", "M", "G", "T"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes}B")
    } else {
        format!("{value:.1}{}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;
    use webindex_kernel::{MimeTable, Mount, MountTable, PathResolver};

    fn service(dir: &TempDir) -> DownloadService {
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/a.txt"), "alpha").unwrap();
        let mounts = MountTable::new([Mount::new("m", dir.path(), None).unwrap()]).unwrap();
        DownloadService::with_defaults(PathResolver::new(
            Arc::new(mounts),
            Arc::new(MimeTable::builtin()),
        ))
    }

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(0), "0B");
        assert_eq!(human_size(1023), "1023B");
        assert_eq!(human_size(1536), "1.5K");
        assert_eq!(human_size(5 * 1024 * 1024), "5.0M");
    }

    #[tokio::test]
    async fn test_breadcrumb_trail() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let node = svc.resolver().navigate("m/sub/a.txt").await.unwrap();
        let crumbs = node.breadcrumbs().await;
        assert_eq!(breadcrumb_trail(&crumbs), "/ > m > sub > a.txt");
    }

    #[tokio::test]
    async fn test_get_writes_file() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let out = TempDir::new().unwrap();
        let target = out.path().join("a.txt");
        get(&svc, "m/sub/a.txt", Some(target.clone())).await.unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"alpha");
    }

    #[tokio::test]
    async fn test_zip_writes_archive() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let out = TempDir::new().unwrap();
        let target = out.path().join("m.zip");
        zip(&svc, "m", Some(target.clone())).await.unwrap();
        let bytes = std::fs::read(&target).unwrap();
        assert_eq!(&bytes[..4], b"PK\x03\x04");
    }

    #[tokio::test]
    async fn test_copy_body_into_vec() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let body = svc.file("m/sub/a.txt").await.unwrap().into_body().unwrap();
        let mut sink: Vec<u8> = Vec::new();
        assert_eq!(copy_body(body, &mut sink).await.unwrap(), 5);
        assert_eq!(sink, b"alpha");
    }
}
