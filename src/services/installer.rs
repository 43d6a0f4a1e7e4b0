//! 模块私有依赖安装
//!
//! 把模块的依赖描述文件安装到 `<target_root>/<module_id>`，与其它模块隔离。
//! 安装失败只返回 Err 给调用方，不影响宿主进程。

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;

#[async_trait]
pub trait DependencyInstaller: Send + Sync {
    async fn install(&self, module_id: &str, requirements: &Path) -> anyhow::Result<()>;
}

/// 未启用安装时的占位实现
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledInstaller;

#[async_trait]
impl DependencyInstaller for DisabledInstaller {
    async fn install(&self, module_id: &str, _requirements: &Path) -> anyhow::Result<()> {
        anyhow::bail!("installer disabled (module {module_id})")
    }
}

/// 调用外部程序安装依赖
///
/// 参数模板中的 `{requirements}` 替换为依赖描述文件路径，`{target}` 替换为模块专属目录。
#[derive(Debug, Clone)]
pub struct CommandInstaller {
    program: String,
    args: Vec<String>,
    target_root: PathBuf,
}

impl CommandInstaller {
    pub fn new(program: impl Into<String>, args: Vec<String>, target_root: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            target_root: target_root.into(),
        }
    }

    pub fn target_dir(&self, module_id: &str) -> PathBuf {
        self.target_root.join(module_id)
    }

    fn render_args(&self, requirements: &Path, target: &Path) -> Vec<String> {
        let req = requirements.display().to_string();
        let tgt = target.display().to_string();
        self.args
            .iter()
            .map(|a| a.replace("{requirements}", &req).replace("{target}", &tgt))
            .collect()
    }
}

#[async_trait]
impl DependencyInstaller for CommandInstaller {
    async fn install(&self, module_id: &str, requirements: &Path) -> anyhow::Result<()> {
        if !requirements.exists() {
            anyhow::bail!("requirements file not found: {}", requirements.display());
        }
        let target = self.target_dir(module_id);
        tokio::fs::create_dir_all(&target).await?;

        let args = self.render_args(requirements, &target);
        tracing::info!(module_id, program = %self.program, ?args, "Installing module dependencies");

        let output = tokio::process::Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "installer exited with {}: {}",
                output.status,
                stderr.trim()
            );
        }
        tracing::info!(module_id, target = %target.display(), "Module dependencies installed");
        Ok(())
    }
}
