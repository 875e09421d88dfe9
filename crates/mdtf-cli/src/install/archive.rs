//! Archive extraction for installer downloads, shelling out to the system
//! `tar` and `unzip` tools.

use mdtf_core::domain::{FrameworkError, FrameworkResult};
use std::fs;
use std::path::Path;
use std::process::Command;

/// Builds the extraction command for `archive`, or `None` when the file
/// extension is not one we know how to unpack.
pub(super) fn extraction_command(archive: &Path, destination: &Path) -> Option<Command> {
    let name = archive.file_name()?.to_str()?.to_ascii_lowercase();
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        let mut command = Command::new("tar");
        command.arg("xzf").arg(archive).arg("-C").arg(destination);
        return Some(command);
    }
    if name.ends_with(".tar") {
        let mut command = Command::new("tar");
        command.arg("xf").arg(archive).arg("-C").arg(destination);
        return Some(command);
    }
    if name.ends_with(".zip") {
        let mut command = Command::new("unzip");
        command.arg("-o").arg("-q").arg(archive).arg("-d").arg(destination);
        return Some(command);
    }
    None
}

pub(super) fn extract(archive: &Path, destination: &Path) -> FrameworkResult<()> {
    let Some(mut command) = extraction_command(archive, destination) else {
        return Err(FrameworkError::download(
            "INSTALL.EXTRACT",
            format!("no extraction tool for '{}'", archive.display()),
        ));
    };
    let status = command.status().map_err(|error| {
        FrameworkError::download(
            "INSTALL.EXTRACT",
            format!("failed to run extraction for '{}': {error}", archive.display()),
        )
    })?;
    if !status.success() {
        return Err(FrameworkError::download(
            "INSTALL.EXTRACT",
            format!("extraction of '{}' exited with {status}", archive.display()),
        ));
    }
    tracing::info!(archive = %archive.display(), "archive extracted");
    Ok(())
}

/// Moves every child of `subdir` one level up and removes the then-empty
/// directory. Archives often wrap their payload in a single top-level
/// directory the rest of the framework does not expect.
pub(super) fn flatten(subdir: &Path) -> FrameworkResult<()> {
    let Some(parent) = subdir.parent() else {
        return Err(FrameworkError::io_system(
            "IO.FLATTEN",
            format!("cannot flatten '{}': no parent directory", subdir.display()),
        ));
    };
    let entries = fs::read_dir(subdir).map_err(|error| {
        FrameworkError::io_system(
            "IO.FLATTEN",
            format!("failed to read '{}': {error}", subdir.display()),
        )
    })?;
    for entry in entries {
        let entry = entry.map_err(|error| {
            FrameworkError::io_system(
                "IO.FLATTEN",
                format!("failed to read '{}': {error}", subdir.display()),
            )
        })?;
        let target = parent.join(entry.file_name());
        if target.exists() {
            return Err(FrameworkError::io_system(
                "IO.FLATTEN",
                format!("cannot flatten '{}': '{}' already exists", subdir.display(), target.display()),
            ));
        }
        fs::rename(entry.path(), &target).map_err(|error| {
            FrameworkError::io_system(
                "IO.FLATTEN",
                format!("failed to move '{}': {error}", entry.path().display()),
            )
        })?;
    }
    fs::remove_dir(subdir).map_err(|error| {
        FrameworkError::io_system(
            "IO.FLATTEN",
            format!("failed to remove '{}': {error}", subdir.display()),
        )
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{extraction_command, flatten};
    use std::ffi::OsStr;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn argv(command: &std::process::Command) -> Vec<String> {
        command
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn extraction_commands_match_the_archive_kind() {
        let dest = Path::new("/data");

        let tar_gz = extraction_command(Path::new("/tmp/obs.TAR.GZ"), dest)
            .expect("tar.gz should be recognized");
        assert_eq!(tar_gz.get_program(), OsStr::new("tar"));
        assert_eq!(argv(&tar_gz), vec!["xzf", "/tmp/obs.TAR.GZ", "-C", "/data"]);

        let tar = extraction_command(Path::new("/tmp/obs.tar"), dest).expect("tar");
        assert_eq!(argv(&tar), vec!["xf", "/tmp/obs.tar", "-C", "/data"]);

        let zip = extraction_command(Path::new("/tmp/obs.zip"), dest).expect("zip");
        assert_eq!(zip.get_program(), OsStr::new("unzip"));
        assert_eq!(argv(&zip), vec!["-o", "-q", "/tmp/obs.zip", "-d", "/data"]);

        assert!(extraction_command(Path::new("/tmp/obs.rar"), dest).is_none());
    }

    #[test]
    fn flatten_lifts_children_and_drops_the_wrapper() {
        let temp = TempDir::new().expect("tempdir");
        let wrapper = temp.path().join("model_data");
        fs::create_dir_all(wrapper.join("nested")).expect("dirs");
        fs::write(wrapper.join("a.nc"), b"a").expect("file");
        fs::write(wrapper.join("nested").join("b.nc"), b"b").expect("file");

        flatten(&wrapper).expect("flatten should succeed");

        assert!(!wrapper.exists(), "wrapper directory should be removed");
        assert!(temp.path().join("a.nc").is_file());
        assert!(temp.path().join("nested").join("b.nc").is_file());
    }

    #[test]
    fn flatten_refuses_to_overwrite_siblings() {
        let temp = TempDir::new().expect("tempdir");
        let wrapper = temp.path().join("model_data");
        fs::create_dir_all(&wrapper).expect("dirs");
        fs::write(wrapper.join("a.nc"), b"new").expect("file");
        fs::write(temp.path().join("a.nc"), b"old").expect("file");

        let error = flatten(&wrapper).expect_err("collision should fail");
        assert_eq!(error.code(), "IO.FLATTEN");
        assert!(error.message().contains("already exists"), "message: {}", error.message());
        assert_eq!(
            fs::read(temp.path().join("a.nc")).expect("sibling survives"),
            b"old"
        );
    }
}
