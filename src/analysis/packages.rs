//! Files installed by the image's package manager, so system libraries are
//! not reported as application code.

use std::io::Write;

use super::Language;
use crate::config::ToolPaths;
use crate::error::Result;
use crate::exec::{CommandRunner, Invocation};

const ALPINE_ENTRYPOINT: &str = "/tmp_alpine_entrypoint.sh";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageFamily {
    Dpkg,
    Rpm,
    Apk,
}

impl PackageFamily {
    /// Package manager for the OS string reported by the vulnerability scanner.
    pub fn from_detected_os(os: &str) -> Option<Self> {
        let os = os.to_lowercase();
        if os.contains("debian") || os.contains("ubuntu") {
            Some(Self::Dpkg)
        } else if ["redhat", "centos", "fedora", "rocky", "alma", "amazon"]
            .iter()
            .any(|name| os.contains(name))
        {
            Some(Self::Rpm)
        } else if os.contains("alpine") {
            Some(Self::Apk)
        } else {
            None
        }
    }

    fn listing_script(&self, extensions: &str) -> String {
        match self {
            Self::Dpkg => format!(
                r"dpkg --get-selections | grep -w 'install' | cut -f1 | xargs dpkg -L | grep -E '\.({})$'",
                extensions
            ),
            Self::Rpm => format!(
                r"rpm -qa --qf '%{{NAME}}\n' | xargs -I {{}} rpm -ql {{}} | grep -E '\.({})$'",
                extensions
            ),
            Self::Apk => format!(
                "#!/bin/sh\napk update > /dev/null\napk info | while read -r package; do\n\tapk info -L \"$package\" | grep -E '\\.({})$'\ndone\n",
                extensions
            ),
        }
    }
}

/// Installed files with the language's extensions, as container paths.
///
/// `Ok(None)` when the listing pipeline exits non-zero, which also happens
/// when nothing matches; callers then analyze system files too.
pub fn installed_files(
    runner: &dyn CommandRunner,
    tools: &ToolPaths,
    image: &str,
    family: PackageFamily,
    language: Language,
) -> Result<Option<Vec<String>>> {
    let script = family.listing_script(language.package_extensions());

    let output = match family {
        PackageFamily::Dpkg | PackageFamily::Rpm => runner.run(
            &Invocation::new(&tools.docker)
                .args(["run", "--rm", "--entrypoint", "bash", image, "-c"])
                .arg(script),
        )?,
        PackageFamily::Apk => {
            // `sh -c` quoting is unreliable on busybox images, so the loop
            // is mounted as a script instead.
            let mut file = tempfile::Builder::new()
                .prefix("alpine_entrypoint")
                .suffix(".sh")
                .tempfile()?;
            file.write_all(script.as_bytes())?;
            file.flush()?;
            let mount = format!("{}:{}", file.path().display(), ALPINE_ENTRYPOINT);
            runner.run(
                &Invocation::new(&tools.docker)
                    .args(["run", "--rm", "-v"])
                    .arg(mount)
                    .args(["--entrypoint", "sh", image, ALPINE_ENTRYPOINT]),
            )?
        }
    };

    if !output.success() {
        return Ok(None);
    }

    Ok(Some(
        output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| line.starts_with('/'))
            .map(str::to_string)
            .collect(),
    ))
}
