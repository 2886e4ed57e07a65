use std::{
    fs::{self, File},
    io::{self, Read},
    path::{Path, PathBuf},
};

use path_absolutize::Absolutize;

pub trait FileSystem {
    type Reader: Read;

    fn is_file(&self, path: &Path) -> io::Result<bool>;
    fn open_read(&self, path: &Path) -> io::Result<Self::Reader>;
}

#[derive(Default)]
pub struct RealFileSystem;

impl RealFileSystem {
    #[inline]
    pub fn new() -> Self {
        Self {}
    }
}

impl FileSystem for RealFileSystem {
    type Reader = File;

    #[inline]
    fn is_file(&self, path: &Path) -> io::Result<bool> {
        match fs::metadata(path) {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[inline]
    fn open_read(&self, path: &Path) -> io::Result<Self::Reader> {
        File::open(path)
    }
}

/// Opens the source file and remembers where it was found, so diagnostics
/// can name it.
pub struct FileManager<S> {
    file_system: S,
    path: Option<PathBuf>,
}

impl<S: FileSystem> FileManager<S> {
    #[inline]
    pub fn new(file_system: S) -> Self {
        Self {
            file_system,
            path: None,
        }
    }

    /// Absolute path of the last file opened.
    #[inline]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn reader<C: AsRef<Path>, P: AsRef<Path>>(
        &mut self,
        cwd: C,
        path: P,
    ) -> io::Result<Option<S::Reader>> {
        let path = path.as_ref().absolutize_from(cwd.as_ref())?.to_path_buf();
        if !self.file_system.is_file(&path)? {
            return Ok(None);
        }
        let reader = self.file_system.open_read(&path)?;
        self.path = Some(path);
        Ok(Some(reader))
    }
}
