//! 패키지 목록 파서
//!
//! 명령 출력(`pacman -Q`, `dpkg -l`, `rpm -qa`)과 셸 없이 복사해 온
//! 패키지 DB 파일(pacman `desc`, dpkg `status`)을 [`InstalledPackage`]로 변환합니다.
//! 해석할 수 없는 줄은 건너뜁니다.

use crate::types::InstalledPackage;

/// `pacman -Q` 출력: `name version`
pub fn parse_pacman_query(output: &str) -> Vec<InstalledPackage> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let name = parts.next()?;
            let version = parts.next()?;
            Some(InstalledPackage::new(name, version))
        })
        .collect()
}

/// `dpkg -l` 출력
///
/// 상태가 `ii`인 줄만 사용하고, `name:arch`의 아키텍처 접미사는 제거합니다.
pub fn parse_dpkg_list(output: &str) -> Vec<InstalledPackage> {
    output
        .lines()
        .filter(|line| line.starts_with("ii "))
        .filter_map(|line| {
            let mut parts = line.split_whitespace().skip(1);
            let name = parts.next()?;
            let version = parts.next()?;
            let name = name.split(':').next().unwrap_or(name);
            Some(InstalledPackage::new(name, version))
        })
        .collect()
}

/// `rpm -qa --queryformat '%{NAME}\t%{VERSION}-%{RELEASE}\n'` 출력
pub fn parse_rpm_query(output: &str) -> Vec<InstalledPackage> {
    output
        .lines()
        .filter_map(|line| {
            let (name, version) = line.split_once('\t')?;
            let (name, version) = (name.trim(), version.trim());
            if name.is_empty() || version.is_empty() {
                return None;
            }
            Some(InstalledPackage::new(name, version))
        })
        .collect()
}

/// pacman 로컬 DB의 `desc` 파일 (`%NAME%` / `%VERSION%` 섹션)
pub fn parse_pacman_desc(content: &str) -> Option<InstalledPackage> {
    let mut name = None;
    let mut version = None;
    let mut lines = content.lines();
    while let Some(line) = lines.next() {
        match line.trim() {
            "%NAME%" => name = lines.next().map(str::trim).filter(|s| !s.is_empty()),
            "%VERSION%" => version = lines.next().map(str::trim).filter(|s| !s.is_empty()),
            _ => {}
        }
    }
    Some(InstalledPackage::new(name?, version?))
}

/// dpkg `status` 파일 (빈 줄로 구분된 스탠자)
///
/// `Status:` 필드가 있으면 `installed`로 끝나는 스탠자만 사용합니다.
/// distroless 이미지의 `status.d/*` 파일에는 `Status:`가 없으므로 그대로 포함합니다.
pub fn parse_dpkg_status(content: &str) -> Vec<InstalledPackage> {
    let mut packages = Vec::new();
    for stanza in content.split("\n\n") {
        let mut name = None;
        let mut version = None;
        let mut installed = true;
        for line in stanza.lines() {
            if let Some(value) = line.strip_prefix("Package:") {
                name = Some(value.trim());
            } else if let Some(value) = line.strip_prefix("Version:") {
                version = Some(value.trim());
            } else if let Some(value) = line.strip_prefix("Status:") {
                installed = value.trim().ends_with(" installed");
            }
        }
        if let (Some(name), Some(version), true) = (name, version, installed) {
            packages.push(InstalledPackage::new(name, version));
        }
    }
    packages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pacman_query_lines() {
        let out = "glibc 2.38-7\nopenssl 3.2.0-1\n\nbroken-line\n";
        let pkgs = parse_pacman_query(out);
        assert_eq!(
            pkgs,
            vec![
                InstalledPackage::new("glibc", "2.38-7"),
                InstalledPackage::new("openssl", "3.2.0-1"),
            ]
        );
    }

    #[test]
    fn dpkg_list_keeps_only_installed_and_strips_arch() {
        let out = "\
Desired=Unknown/Install/Remove/Purge/Hold
| Status=Not/Inst/Conf-files/Unpacked/halF-conf/Half-inst/trig-aWait/Trig-pend
||/ Name           Version         Architecture Description
+++-==============-===============-============-=================================
ii  bash           5.2.15-2+b2     amd64        GNU Bourne Again SHell
rc  oldpkg         1.0-1           amd64        removed but configs remain
ii  libc6:amd64    2.36-9+deb12u4  amd64        GNU C Library: Shared libraries
";
        let pkgs = parse_dpkg_list(out);
        assert_eq!(
            pkgs,
            vec![
                InstalledPackage::new("bash", "5.2.15-2+b2"),
                InstalledPackage::new("libc6", "2.36-9+deb12u4"),
            ]
        );
    }

    #[test]
    fn rpm_query_tab_separated() {
        let out = "bash\t5.2.26-3.fc40\nopenssl-libs\t3.2.1-2.fc40\n\tbad\n";
        let pkgs = parse_rpm_query(out);
        assert_eq!(pkgs.len(), 2);
        assert_eq!(pkgs[1], InstalledPackage::new("openssl-libs", "3.2.1-2.fc40"));
    }

    #[test]
    fn pacman_desc_sections() {
        let desc = "%NAME%\nlinux\n\n%VERSION%\n6.7.4.arch1-1\n\n%BASE%\nlinux\n";
        assert_eq!(
            parse_pacman_desc(desc),
            Some(InstalledPackage::new("linux", "6.7.4.arch1-1"))
        );
        assert_eq!(parse_pacman_desc("%NAME%\nlinux\n"), None);
    }

    #[test]
    fn dpkg_status_respects_status_field() {
        let status = "\
Package: bash
Status: install ok installed
Version: 5.2.15-2+b2

Package: gone
Status: deinstall ok config-files
Version: 1.0

Package: base-files
Version: 12.4+deb12u5
";
        let pkgs = parse_dpkg_status(status);
        assert_eq!(
            pkgs,
            vec![
                InstalledPackage::new("bash", "5.2.15-2+b2"),
                InstalledPackage::new("base-files", "12.4+deb12u5"),
            ]
        );
    }
}
