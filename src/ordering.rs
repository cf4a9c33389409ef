// src/ordering.rs

//! Download order for a repository listing: small config and tokenizer
//! artifacts first, then weight shards by index, then everything else.

use crate::models::RemoteFile;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

static SHARD_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^.+-(\d+)-of-(\d+)\.[^.]+$").expect("shard pattern is valid"));

const CONFIG_EXTENSIONS: [&str; 3] = ["json", "txt", "md"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Config,
    /// Carries the shard index as written, e.g. 2 for `-00002-of-`.
    Shard(u64),
    Other,
}

pub struct FileOrderPolicy;

impl FileOrderPolicy {
    /// Classifies a repository path by its basename.
    pub fn classify(path: &str) -> FileKind {
        let basename = Path::new(path)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(path);

        if let Some(index) = SHARD_PATTERN
            .captures(basename)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok())
        {
            return FileKind::Shard(index);
        }

        let is_config = Path::new(basename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| CONFIG_EXTENSIONS.contains(&ext))
            .unwrap_or(false);

        if is_config {
            FileKind::Config
        } else {
            FileKind::Other
        }
    }

    /// Config ++ shards by ascending index ++ the rest. Within each group the
    /// input order is kept.
    pub fn order(files: Vec<RemoteFile>) -> Vec<RemoteFile> {
        let mut configs = Vec::new();
        let mut shards = Vec::new();
        let mut others = Vec::new();

        for file in files {
            match Self::classify(&file.path) {
                FileKind::Config => configs.push(file),
                FileKind::Shard(index) => shards.push((index, file)),
                FileKind::Other => others.push(file),
            }
        }

        // sort_by_key is stable
        shards.sort_by_key(|(index, _)| *index);

        configs
            .into_iter()
            .chain(shards.into_iter().map(|(_, file)| file))
            .chain(others)
            .collect()
    }

    /// [`order`](Self::order) for bare names.
    pub fn order_names<S: AsRef<str>>(names: &[S]) -> Vec<String> {
        let files = names.iter().map(|n| RemoteFile::new(n.as_ref())).collect();
        Self::order(files).into_iter().map(|f| f.path).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_extension_and_shard_pattern() {
        assert_eq!(FileOrderPolicy::classify("config.json"), FileKind::Config);
        assert_eq!(FileOrderPolicy::classify("docs/README.md"), FileKind::Config);
        assert_eq!(FileOrderPolicy::classify("merges.txt"), FileKind::Config);
        assert_eq!(
            FileOrderPolicy::classify("model-00003-of-00005.safetensors"),
            FileKind::Shard(3)
        );
        assert_eq!(
            FileOrderPolicy::classify("onnx/model-00012-of-00020.onnx"),
            FileKind::Shard(12)
        );
        assert_eq!(FileOrderPolicy::classify("model.safetensors"), FileKind::Other);
        assert_eq!(FileOrderPolicy::classify(".gitattributes"), FileKind::Other);
    }

    #[test]
    fn orders_config_then_shards_then_rest() {
        let ordered = FileOrderPolicy::order_names(&[
            "a.json",
            "model-00002-of-00003.safetensors",
            "model-00001-of-00003.safetensors",
            "readme.md",
        ]);
        assert_eq!(
            ordered,
            vec![
                "a.json",
                "readme.md",
                "model-00001-of-00003.safetensors",
                "model-00002-of-00003.safetensors",
            ]
        );
    }

    #[test]
    fn keeps_input_order_within_groups() {
        let ordered = FileOrderPolicy::order_names(&[
            "tokenizer.model",
            "z.json",
            "b-00010-of-00011.bin",
            "a.json",
            ".gitattributes",
            "a-00002-of-00011.bin",
            "c-00002-of-00003.bin",
        ]);
        assert_eq!(
            ordered,
            vec![
                "z.json",
                "a.json",
                "a-00002-of-00011.bin",
                "c-00002-of-00003.bin",
                "b-00010-of-00011.bin",
                "tokenizer.model",
                ".gitattributes",
            ]
        );
    }

    #[test]
    fn keeps_listing_metadata() {
        let mut shard = RemoteFile::new("model-00001-of-00002.safetensors");
        shard.sha256 = Some("abc".into());
        let ordered = FileOrderPolicy::order(vec![shard.clone(), RemoteFile::new("config.json")]);
        assert_eq!(ordered[1], shard);
    }
}
