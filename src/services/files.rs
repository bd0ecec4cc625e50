// 远端文件服务
// 不依赖 SFTP 子系统，全部操作通过会话连接上的一次性命令完成，
// 内容经 base64 编解码穿越命令通道。

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::ssh::{CommandOutput, SessionKey, SessionRegistry, SshError};

/// 读取大小上限（字节）
pub const MAX_READ_SIZE: u64 = 1024 * 1024;

/// 上传分片大小（base64 字符数）
const UPLOAD_CHUNK_SIZE: usize = 32 * 1024;

/// 文件操作错误
#[derive(Debug, Error)]
pub enum FileError {
    #[error("File too large: {size} bytes (limit {limit})")]
    TooLarge { size: u64, limit: u64 },
    #[error(transparent)]
    Ssh(#[from] SshError),
    #[error("Remote command failed: {0}")]
    Remote(String),
    #[error("Failed to decode file content: {0}")]
    Decode(String),
}

/// 目录条目类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Folder,
}

/// 目录条目
#[derive(Clone, Debug, Serialize)]
pub struct RemoteEntry {
    pub name: String,
    pub path: String,
    pub kind: EntryKind,
    /// 目录不报大小
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub permissions: String,
    pub owner: String,
    pub group: String,
}

/// 读取文本文件内容
/// 先用 wc 探大小挡住超限文件，再经 base64 取回
pub async fn read_file(
    registry: &SessionRegistry,
    key: &SessionKey,
    path: &str,
) -> Result<String, FileError> {
    let quoted = quote(path);

    let probe = run_ok(registry, key, format!("wc -c < {}", quoted)).await?;
    let text = probe.text();
    let size: u64 = text
        .trim()
        .parse()
        .map_err(|_| FileError::Remote(format!("Unexpected size probe output: {}", text.trim())))?;
    if size > MAX_READ_SIZE {
        return Err(FileError::TooLarge {
            size,
            limit: MAX_READ_SIZE,
        });
    }

    let encoded = run_ok(registry, key, format!("cat {} | base64", quoted)).await?;
    // base64 输出按行折叠，拼回去再解码
    let cleaned: String = encoded
        .text()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let bytes = BASE64
        .decode(cleaned.as_bytes())
        .map_err(|e| FileError::Decode(e.to_string()))?;

    Ok(String::from_utf8_lossy(&bytes).to_string())
}

/// 写入文件内容
/// base64 编码后分片追加到远端临时文件，最后一步解码落盘，失败时清理临时文件
pub async fn write_file(
    registry: &SessionRegistry,
    key: &SessionKey,
    path: &str,
    content: &[u8],
) -> Result<(), FileError> {
    let encoded = BASE64.encode(content);
    let temp = temp_upload_path();
    debug!(
        "[Files] Uploading {} bytes to {} via {}",
        content.len(),
        path,
        temp
    );

    match upload(registry, key, &encoded, &temp, path).await {
        Ok(()) => Ok(()),
        Err(err) => {
            // 半截的临时文件不留在远端
            let _ = registry
                .exec(key, format!("rm -f {}", quote(&temp)))
                .await;
            Err(err)
        }
    }
}

async fn upload(
    registry: &SessionRegistry,
    key: &SessionKey,
    encoded: &str,
    temp: &str,
    path: &str,
) -> Result<(), FileError> {
    let quoted_temp = quote(temp);

    // 清空（或创建）临时文件
    run_ok(registry, key, format!("> {}", quoted_temp)).await?;

    // base64 字符集没有 shell 元字符，双引号里原样安全
    for chunk in encoded.as_bytes().chunks(UPLOAD_CHUNK_SIZE) {
        let chunk = String::from_utf8_lossy(chunk);
        run_ok(
            registry,
            key,
            format!("printf \"%s\" \"{}\" >> {}", chunk, quoted_temp),
        )
        .await?;
    }

    run_ok(
        registry,
        key,
        format!(
            "base64 -d < {} > {} && rm -f {}",
            quoted_temp,
            quote(path),
            quoted_temp
        ),
    )
    .await?;
    Ok(())
}

/// 列目录
pub async fn list_dir(
    registry: &SessionRegistry,
    key: &SessionKey,
    path: &str,
) -> Result<Vec<RemoteEntry>, FileError> {
    let output = run_ok(registry, key, format!("ls -la {}", quote(path))).await?;
    Ok(parse_ls_output(&output.text(), path))
}

/// 删除文件或目录
pub async fn delete_path(
    registry: &SessionRegistry,
    key: &SessionKey,
    path: &str,
) -> Result<(), FileError> {
    run_ok(registry, key, format!("rm -rf {}", quote(path))).await?;
    Ok(())
}

/// 创建空文件
pub async fn create_file(
    registry: &SessionRegistry,
    key: &SessionKey,
    path: &str,
) -> Result<(), FileError> {
    run_ok(registry, key, format!("touch {}", quote(path))).await?;
    Ok(())
}

/// 备份文件（原路径加时间戳后缀），返回备份路径
pub async fn backup_file(
    registry: &SessionRegistry,
    key: &SessionKey,
    path: &str,
) -> Result<String, FileError> {
    let stamp = chrono::Local::now().format("%Y%m%d%H%M%S");
    let backup = format!("{}.{}", path, stamp);
    run_ok(
        registry,
        key,
        format!("cp {} {}", quote(path), quote(&backup)),
    )
    .await?;
    Ok(backup)
}

/// 执行命令并要求零退出码，否则带着输出报 Remote 错误
async fn run_ok(
    registry: &SessionRegistry,
    key: &SessionKey,
    command: String,
) -> Result<CommandOutput, FileError> {
    let output = registry.exec(key, command.clone()).await?;
    if !output.is_success() {
        return Err(FileError::Remote(format!(
            "`{}` exited with {}: {}",
            command,
            output.exit_code,
            output.text().trim()
        )));
    }
    Ok(output)
}

/// 远端临时文件路径（毫秒时间戳防撞名）
fn temp_upload_path() -> String {
    format!(
        "/tmp/.shellrelay-upload-{}",
        chrono::Utc::now().timestamp_millis()
    )
}

/// 双引号包裹并转义，路径里的空格与特殊字符不拆散命令
fn quote(path: &str) -> String {
    let mut quoted = String::with_capacity(path.len() + 2);
    quoted.push('"');
    for c in path.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// 解析 ls -la 输出
/// 跳过 total 行与 . / ..，目录在前按名称排序
fn parse_ls_output(output: &str, base: &str) -> Vec<RemoteEntry> {
    let mut entries: Vec<RemoteEntry> = Vec::new();

    for line in output.lines() {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with("total") {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 9 {
            continue;
        }

        let permissions = parts[0];
        let mut name = parts[8..].join(" ");
        if name == "." || name == ".." {
            continue;
        }
        // 软链接显示成 "name -> target"，只留名字
        if permissions.starts_with('l') {
            if let Some((link_name, _)) = name.split_once(" -> ") {
                name = link_name.to_string();
            }
        }

        let kind = if permissions.starts_with('d') {
            EntryKind::Folder
        } else {
            EntryKind::File
        };

        entries.push(RemoteEntry {
            path: join_remote_path(base, &name),
            name,
            kind,
            size: match kind {
                EntryKind::Folder => None,
                EntryKind::File => parts[4].parse::<u64>().ok(),
            },
            permissions: permissions.to_string(),
            owner: parts[2].to_string(),
            group: parts[3].to_string(),
        });
    }

    entries.sort_by(|a, b| match (a.kind, b.kind) {
        (EntryKind::Folder, EntryKind::File) => std::cmp::Ordering::Less,
        (EntryKind::File, EntryKind::Folder) => std::cmp::Ordering::Greater,
        _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
    });

    entries
}

/// 拼接远端路径
fn join_remote_path(base: &str, name: &str) -> String {
    if base == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", base.trim_end_matches('/'), name)
    }
}
