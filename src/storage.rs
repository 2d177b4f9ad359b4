use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait Storage: Send + Sync {
    async fn read(&self, path: &str) -> Result<Vec<u8>>;
    async fn write(&self, path: &str, content: &[u8]) -> Result<()>;
    async fn exists(&self, path: &str) -> Result<bool>;
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    async fn read_string(&self, path: &str) -> Result<String> {
        let bytes = self.read(path).await?;
        Ok(String::from_utf8(bytes)?)
    }
}

pub struct NativeStorage;

impl NativeStorage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NativeStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for NativeStorage {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(path).await?)
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(path).await?)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let path = std::path::Path::new(prefix);
        let mut entries = Vec::new();

        if path.exists() {
            if path.is_dir() {
                let mut dir = tokio::fs::read_dir(path).await?;
                while let Some(entry) = dir.next_entry().await? {
                    entries.push(entry.path().to_string_lossy().to_string());
                }
            } else {
                entries.push(prefix.to_string());
            }
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_creates_parent_directories() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir
            .path()
            .join("nested/deeper/artifact.txt")
            .to_string_lossy()
            .to_string();

        let storage = NativeStorage::new();
        storage.write(&path, b"chapter text").await?;

        assert!(storage.exists(&path).await?);
        assert_eq!(storage.read_string(&path).await?, "chapter text");
        Ok(())
    }

    #[tokio::test]
    async fn list_returns_directory_entries() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let root = temp_dir.path().to_string_lossy().to_string();

        let storage = NativeStorage::new();
        storage.write(&format!("{root}/a.txt"), b"a").await?;
        storage.write(&format!("{root}/b.txt"), b"b").await?;

        let mut entries = storage.list(&root).await?;
        entries.sort();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].ends_with("a.txt"));
        assert!(entries[1].ends_with("b.txt"));
        Ok(())
    }

    #[tokio::test]
    async fn exists_is_false_for_missing_path() -> Result<()> {
        let storage = NativeStorage::new();
        assert!(!storage.exists("/definitely/not/here.txt").await?);
        Ok(())
    }
}
