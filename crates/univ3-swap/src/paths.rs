use directories::ProjectDirs;
use eyre::ContextCompat as _;
use std::path::PathBuf;

pub const ENV_DATA_DIR: &str = "UNIV3_SWAP_DATA_DIR";
const LOG_FILE_NAME: &str = "univ3-swap.log.jsonl";

#[derive(Debug, Clone)]
pub struct SwapPaths {
    pub data_dir: PathBuf,
    pub log_file: PathBuf,
}

impl SwapPaths {
    pub fn discover() -> eyre::Result<Self> {
        if let Some(dir) = std::env::var_os(ENV_DATA_DIR).filter(|v| !v.is_empty()) {
            return Ok(Self::in_dir(PathBuf::from(dir)));
        }

        // macOS: ~/Library/Application Support/univ3-swap
        // Linux: ~/.local/share/univ3-swap
        let proj =
            ProjectDirs::from("", "", "univ3-swap").context("failed to resolve project dirs")?;
        Ok(Self::in_dir(proj.data_dir().to_path_buf()))
    }

    fn in_dir(data_dir: PathBuf) -> Self {
        let log_file = data_dir.join(LOG_FILE_NAME);
        Self { data_dir, log_file }
    }

    pub fn log_file_name(&self) -> &str {
        self.log_file
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or(LOG_FILE_NAME)
    }
}
