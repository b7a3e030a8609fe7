//! SUSE 백엔드
//!
//! HTTP 피드가 없습니다. 호스트에서는 `zypper list-patches --cve`와
//! `zypper lu -t patch`의 파이프 구분 표를 패치 목록으로 합치고, 패치 요약에서
//! 추론한 패키지 이름과 설치 패키지를 정확히 일치시킵니다.
//!
//! 컨테이너는 [`SuseContainerBackend`]가 따로 처리합니다. 셸이 있으면 같은 zypper
//! 명령을, 없으면 `/var/cache/zypp/raw`의 `updateinfo.xml`을 읽습니다. 둘 다 비면
//! [`OsvPatchApi`]로 설치 패키지를 외부 API에 조회합니다. 패치가 가리키는
//! 패키지 이름과 설치 패키지 이름은 느슨하게([`fuzzy_name_match`]) 일치시킵니다.

use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::time::Duration;

use flate2::read::GzDecoder;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::container::{ContainerRunner, ContainerRuntime, ExecMode, copy_with_timeout, extract_archive};
use crate::detect::OsRelease;
use crate::enumerate::PackageFormat;
use crate::error::CveScannerError;
use crate::exec::CommandRunner;
use crate::fetch::FeedClient;
use crate::types::{Distro, InstalledPackage, Match, PackageResult};

use super::DistroBackend;

const LIST_PATCHES_CVE: [&str; 4] = ["zypper", "--non-interactive", "list-patches", "--cve"];
const LIST_UPDATES_PATCH: [&str; 5] = ["zypper", "--non-interactive", "lu", "-t", "patch"];

/// zypper 정보성 종료 코드 (업데이트 필요, 보안 업데이트 필요, 재부팅/재시작 필요)
const ZYPPER_INFO_EXIT_CODES: std::ops::RangeInclusive<i64> = 100..=103;

const SKIPPED_STATUSES: [&str; 2] = ["applied", "not needed"];

/// 컨테이너의 zypp 원시 메타데이터 캐시
const ZYPP_RAW_CACHE: &str = "/var/cache/zypp/raw";

/// 부분 문자열 일치를 허용하는 최소 이름 길이
const MIN_SUBSTRING_LEN: usize = 5;

/// OSV `querybatch` 요청당 최대 질의 수
const OSV_MAX_QUERIES: usize = 1000;

const STATUS_NEEDED: &str = "needed";

/// 패치 하나
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SusePatch {
    /// `openSUSE-SLE-15.5-2024-1234` 형식의 패치 이름
    pub name: String,
    pub cves: Vec<String>,
    pub severity: String,
    pub status: String,
    pub summary: String,
    /// 패치가 가리키는 패키지 이름
    pub packages: Vec<String>,
    /// 패키지 이름별 수정 버전 (`version-release`, updateinfo에서만 채워짐)
    pub fixed_versions: HashMap<String, String>,
}

impl SusePatch {
    fn add_package(&mut self, name: &str) {
        if !name.is_empty() && !self.packages.iter().any(|p| p == name) {
            self.packages.push(name.to_owned());
        }
    }

    fn add_cve(&mut self, cve: &str) {
        if !cve.is_empty() && !self.cves.iter().any(|c| c == cve) {
            self.cves.push(cve.to_owned());
        }
    }

    fn to_match(&self, pkg: &InstalledPackage, implied: &str) -> Match {
        Match {
            advisory: self.name.clone(),
            package: pkg.name.clone(),
            installed_version: pkg.version.clone(),
            affected: pkg.version.clone(),
            fixed: self.fixed_versions.get(implied).cloned(),
            issues: self.cves.clone(),
            severity: self.severity.clone(),
            status: self.status.clone(),
        }
    }
}

/// zypper의 파이프 구분 표를 `소문자 헤더 -> 값` 행 목록으로 파싱합니다.
///
/// `|`가 들어간 첫 줄이 헤더이고, `---+---` 구분선과 열 수가 다른 줄은 건너뜁니다.
pub fn parse_pipe_table(output: &str) -> Vec<HashMap<String, String>> {
    let mut lines = output.lines().filter(|l| l.contains('|'));
    let Some(header) = lines.next() else {
        return Vec::new();
    };
    let columns: Vec<String> = header.split('|').map(|c| c.trim().to_lowercase()).collect();

    lines
        .filter(|l| !l.chars().all(|c| matches!(c, '-' | '+' | '|' | ' ')))
        .filter_map(|line| {
            let cells: Vec<&str> = line.split('|').map(str::trim).collect();
            (cells.len() == columns.len()).then(|| {
                columns
                    .iter()
                    .cloned()
                    .zip(cells.into_iter().map(str::to_owned))
                    .collect()
            })
        })
        .collect()
}

/// 패치 요약에서 패키지 이름을 추론합니다.
///
/// `Security update for openssl-1_1` -> `["openssl-1_1"]`,
/// `Recommended update for a, b and c` -> `["a", "b", "c"]`.
/// 공백이 들어간 조각(`the Linux Kernel`)은 패키지 이름이 아니므로 버립니다.
pub fn implied_packages(summary: &str) -> Vec<String> {
    let lower = summary.to_ascii_lowercase();
    let Some(pos) = lower.find("update for ") else {
        return Vec::new();
    };
    let rest = &summary[pos + "update for ".len()..];
    rest.split(", ")
        .flat_map(|part| part.split(" and "))
        .map(|p| p.trim().trim_end_matches('.'))
        .filter(|p| !p.is_empty() && !p.contains(char::is_whitespace))
        .map(str::to_owned)
        .collect()
}

/// 두 zypper 명령의 표를 패치 이름 기준으로 합칩니다.
///
/// 상태가 `applied`/`not needed`인 패치는 제외합니다.
pub fn collect_patches(list_patches_cve: &str, list_updates: &str) -> Vec<SusePatch> {
    let mut patches: BTreeMap<String, SusePatch> = BTreeMap::new();

    let rows = parse_pipe_table(list_patches_cve)
        .into_iter()
        .chain(parse_pipe_table(list_updates));
    for row in rows {
        let cell = |key: &str| row.get(key).map(String::as_str).unwrap_or_default();
        let name = match cell("patch") {
            "" => cell("name"),
            patch => patch,
        };
        if name.is_empty() {
            continue;
        }
        let status = cell("status");
        if SKIPPED_STATUSES.contains(&status.to_lowercase().as_str()) {
            continue;
        }

        let patch = patches.entry(name.to_owned()).or_insert_with(|| SusePatch {
            name: name.to_owned(),
            ..SusePatch::default()
        });
        let number = cell("no.");
        if cell("issue").eq_ignore_ascii_case("cve") || number.starts_with("CVE-") {
            patch.add_cve(number);
        }
        if patch.severity.is_empty() {
            patch.severity = cell("severity").to_owned();
        }
        if patch.status.is_empty() {
            patch.status = status.to_owned();
        }
        let summary = cell("summary");
        if patch.summary.is_empty() && !summary.is_empty() {
            patch.summary = summary.to_owned();
            for pkg in implied_packages(summary) {
                patch.add_package(&pkg);
            }
        }
    }

    patches.into_values().collect()
}

fn zypper_output(out: Result<crate::exec::CommandOutput, CveScannerError>, argv: &[&str]) -> String {
    match out {
        Ok(out) if out.success() || ZYPPER_INFO_EXIT_CODES.contains(&out.exit_code) => out.stdout,
        Ok(out) => {
            warn!(command = %argv.join(" "), exit_code = out.exit_code, "zypper failed");
            String::new()
        }
        Err(e) => {
            warn!(command = %argv.join(" "), error = %e, "zypper unavailable");
            String::new()
        }
    }
}

/// 두 zypper 명령을 실행해 패치 목록을 만듭니다. 실패한 명령은 빈 출력으로 취급합니다.
pub async fn query_zypper<R: CommandRunner>(runner: &R) -> Vec<SusePatch> {
    let cve = zypper_output(runner.run(&LIST_PATCHES_CVE).await, &LIST_PATCHES_CVE);
    let updates = zypper_output(runner.run(&LIST_UPDATES_PATCH).await, &LIST_UPDATES_PATCH);
    collect_patches(&cve, &updates)
}

/// 호스트 SUSE 매칭 백엔드
pub struct SuseBackend<R> {
    runner: R,
}

impl<R: CommandRunner> SuseBackend<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }
}

impl<R: CommandRunner> DistroBackend for SuseBackend<R> {
    type Feed = Vec<SusePatch>;

    fn distro(&self) -> Distro {
        Distro::Suse
    }

    fn package_format(&self) -> PackageFormat {
        PackageFormat::Rpm
    }

    async fn fetch_advisories(&self) -> Vec<SusePatch> {
        query_zypper(&self.runner).await
    }

    fn advisory_count(&self, feed: &Vec<SusePatch>) -> usize {
        feed.len()
    }

    async fn match_batch(&self, batch: &[InstalledPackage], feed: &Vec<SusePatch>) -> Vec<PackageResult> {
        let mut index: HashMap<&str, Vec<&SusePatch>> = HashMap::new();
        for patch in feed {
            for name in &patch.packages {
                index.entry(name.as_str()).or_default().push(patch);
            }
        }

        batch
            .iter()
            .map(|pkg| {
                let matches = index
                    .get(pkg.name.as_str())
                    .into_iter()
                    .flatten()
                    .map(|patch| patch.to_match(pkg, &pkg.name))
                    .collect();
                PackageResult::new(pkg, matches)
            })
            .collect()
    }
}

/// 패치가 가리키는 이름과 설치 패키지 이름의 느슨한 일치
///
/// 순서대로 시도합니다.
/// 1. 대소문자 무시 정확 일치
/// 2. 한쪽이 다른 쪽의 접두어이고 바로 뒤가 `-`, `_`, `.` 또는 숫자
/// 3. 양쪽의 `lib` 접두어를 뗀 뒤 1, 2 규칙
/// 4. 짧은 쪽이 5자 이상이면 부분 문자열
pub fn fuzzy_name_match(implied: &str, installed: &str) -> bool {
    let a = implied.to_lowercase();
    let b = installed.to_lowercase();
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b || prefix_at_boundary(&a, &b) {
        return true;
    }

    let stripped_a = a.strip_prefix("lib").unwrap_or(&a);
    let stripped_b = b.strip_prefix("lib").unwrap_or(&b);
    if !stripped_a.is_empty()
        && !stripped_b.is_empty()
        && (stripped_a == stripped_b || prefix_at_boundary(stripped_a, stripped_b))
    {
        return true;
    }

    let (short, long) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };
    short.len() >= MIN_SUBSTRING_LEN && long.contains(short.as_str())
}

fn prefix_at_boundary(a: &str, b: &str) -> bool {
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    long.strip_prefix(short)
        .and_then(|rest| rest.chars().next())
        .is_some_and(|c| matches!(c, '-' | '_' | '.') || c.is_ascii_digit())
}

/// `updateinfo.xml`에서 패치 목록을 파싱합니다.
///
/// `<update>`마다 `<id>`, `<title>`, `<severity>`, `type="cve"` 참조와
/// `<pkglist>`의 패키지 이름/수정 버전을 읽습니다.
pub fn parse_updateinfo(content: &str) -> Result<Vec<SusePatch>, CveScannerError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut patches = Vec::new();
    let mut current: Option<SusePatch> = None;
    let mut text_target: Option<Vec<u8>> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.local_name().as_ref().to_vec();
                if name == b"update" {
                    current = Some(SusePatch {
                        status: attr(&e, b"status").unwrap_or_default(),
                        ..SusePatch::default()
                    });
                } else if let Some(patch) = current.as_mut() {
                    visit_element(patch, &e);
                }
                text_target = Some(name);
            }
            Ok(Event::Empty(e)) => {
                if let Some(patch) = current.as_mut() {
                    visit_element(patch, &e);
                }
            }
            Ok(Event::Text(t)) => {
                if let (Some(patch), Some(tag)) = (current.as_mut(), text_target.as_deref()) {
                    let text = reader
                        .decoder()
                        .decode(t.as_ref())
                        .map_err(|e| CveScannerError::Parse(format!("updateinfo text: {e}")))?
                        .into_owned();
                    match tag {
                        b"id" => patch.name = text,
                        b"title" => {
                            for pkg in implied_packages(&text) {
                                patch.add_package(&pkg);
                            }
                            patch.summary = text;
                        }
                        b"severity" => patch.severity = text,
                        _ => {}
                    }
                }
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"update"
                    && let Some(patch) = current.take()
                    && !patch.name.is_empty()
                {
                    patches.push(patch);
                }
                text_target = None;
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(CveScannerError::Parse(format!(
                    "updateinfo at {}: {e}",
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(patches)
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

fn visit_element(patch: &mut SusePatch, e: &BytesStart<'_>) {
    match e.local_name().as_ref() {
        b"reference" => {
            if attr(e, b"type").as_deref() == Some("cve")
                && let Some(id) = attr(e, b"id")
            {
                patch.add_cve(&id);
            }
        }
        b"package" => {
            let Some(name) = attr(e, b"name") else {
                return;
            };
            if let (Some(version), Some(release)) = (attr(e, b"version"), attr(e, b"release")) {
                patch.fixed_versions.insert(name.clone(), format!("{version}-{release}"));
            }
            patch.add_package(&name);
        }
        _ => {}
    }
}

fn decode_entry(path: &str, data: &[u8]) -> Option<String> {
    if path.ends_with(".gz") {
        let mut text = String::new();
        match GzDecoder::new(data).read_to_string(&mut text) {
            Ok(_) => Some(text),
            Err(e) => {
                debug!(path, error = %e, "failed to decompress updateinfo");
                None
            }
        }
    } else {
        Some(String::from_utf8_lossy(data).into_owned())
    }
}

/// os-release에서 OSV 에코시스템 이름을 만듭니다.
///
/// `openSUSE:Tumbleweed`, `openSUSE:Leap 15.5`,
/// `SUSE:Linux Enterprise Server 15 SP5` 형식입니다. 알 수 없으면 `None`.
pub fn osv_ecosystem(release: &OsRelease) -> Option<String> {
    let id = release.id.to_lowercase();
    if id.contains("tumbleweed") || id.contains("microos") {
        return Some("openSUSE:Tumbleweed".to_owned());
    }
    let version = release.version_id.as_deref()?;
    if id == "opensuse-leap" {
        return Some(format!("openSUSE:Leap {version}"));
    }
    let product = match id.as_str() {
        "sles" | "sles_sap" => "Server",
        "sled" => "Desktop",
        _ => return None,
    };
    let sle_version = match version.split_once('.') {
        Some((major, sp)) if sp != "0" => format!("{major} SP{sp}"),
        Some((major, _)) => major.to_owned(),
        None => version.to_owned(),
    };
    Some(format!("SUSE:Linux Enterprise {product} {sle_version}"))
}

#[derive(Serialize)]
struct OsvBatchRequest<'a> {
    queries: Vec<OsvQuery<'a>>,
}

#[derive(Serialize)]
struct OsvQuery<'a> {
    package: OsvPackage<'a>,
    version: &'a str,
}

#[derive(Serialize)]
struct OsvPackage<'a> {
    name: &'a str,
    ecosystem: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct OsvBatchResponse {
    #[serde(default)]
    results: Vec<OsvResult>,
}

#[derive(Debug, Default, Deserialize)]
struct OsvResult {
    #[serde(default)]
    vulns: Vec<OsvVuln>,
}

#[derive(Debug, Deserialize)]
struct OsvVuln {
    id: String,
    #[serde(default)]
    aliases: Vec<String>,
}

/// OSV 일괄 조회 API로 패치를 찾습니다.
///
/// 설치 버전으로 질의하므로 응답의 항목은 이미 그 버전에 해당하는 것만 남습니다.
pub struct OsvPatchApi {
    client: FeedClient,
    url: String,
    timeout: Duration,
    ecosystem: String,
}

impl OsvPatchApi {
    pub fn new(client: FeedClient, url: String, timeout: Duration, ecosystem: String) -> Self {
        Self {
            client,
            url,
            timeout,
            ecosystem,
        }
    }

    /// 에코시스템을 알 수 없는 릴리스면 `None`.
    pub fn for_release(client: FeedClient, url: String, timeout: Duration, release: &OsRelease) -> Option<Self> {
        osv_ecosystem(release).map(|ecosystem| Self::new(client, url, timeout, ecosystem))
    }

    pub fn ecosystem(&self) -> &str {
        &self.ecosystem
    }

    /// 설치 패키지를 질의하고 어드바이저리 id별로 패치를 모읍니다.
    ///
    /// 요청이 실패한 청크는 건너뜁니다.
    pub async fn query(&self, installed: &[InstalledPackage]) -> Vec<SusePatch> {
        let mut merged: BTreeMap<String, SusePatch> = BTreeMap::new();
        for chunk in installed.chunks(OSV_MAX_QUERIES) {
            let request = OsvBatchRequest {
                queries: chunk
                    .iter()
                    .map(|pkg| OsvQuery {
                        package: OsvPackage {
                            name: &pkg.name,
                            ecosystem: &self.ecosystem,
                        },
                        version: &pkg.version,
                    })
                    .collect(),
            };
            let Some(response) = self
                .client
                .post_or_degrade::<_, OsvBatchResponse>(Distro::Suse, &self.url, &request, self.timeout)
                .await
            else {
                continue;
            };

            // 응답 순서는 질의 순서와 같다
            for (pkg, result) in chunk.iter().zip(response.results) {
                for vuln in result.vulns {
                    let patch = merged.entry(vuln.id.clone()).or_insert_with(|| SusePatch {
                        name: vuln.id.clone(),
                        status: STATUS_NEEDED.to_owned(),
                        ..SusePatch::default()
                    });
                    if vuln.id.starts_with("CVE-") {
                        patch.add_cve(&vuln.id);
                    }
                    for alias in vuln.aliases.iter().filter(|a| a.starts_with("CVE-")) {
                        patch.add_cve(alias);
                    }
                    patch.add_package(&pkg.name);
                }
            }
        }
        merged.into_values().collect()
    }
}

/// 컨테이너 SUSE 매칭 백엔드
///
/// 패치는 [`discover`](Self::discover)로 미리 모아 둡니다.
pub struct SuseContainerBackend {
    patches: Vec<SusePatch>,
}

impl SuseContainerBackend {
    pub fn new(patches: Vec<SusePatch>) -> Self {
        Self { patches }
    }

    pub fn patches(&self) -> &[SusePatch] {
        &self.patches
    }

    /// 컨테이너에서 패치를 찾습니다.
    ///
    /// 순서: 셸로 zypper 실행, zypp 원시 캐시의 updateinfo, `api`로 설치 패키지 조회.
    /// 앞 단계가 패치를 하나라도 찾으면 거기서 멈춥니다.
    pub async fn discover<C: ContainerRuntime>(
        runtime: &C,
        id: &str,
        shell: Option<&'static str>,
        timeout: Duration,
        api: Option<&OsvPatchApi>,
        installed: &[InstalledPackage],
    ) -> Self {
        if let Some(shell) = shell {
            let runner = ContainerRunner::new(runtime, id, ExecMode::Shell(shell), timeout);
            let patches = query_zypper(&runner).await;
            if !patches.is_empty() {
                info!(container = id, patches = patches.len(), "discovered patches via zypper");
                return Self::new(patches);
            }
        }

        let patches = Self::from_zypp_cache(runtime, id, timeout).await;
        if !patches.is_empty() {
            info!(container = id, patches = patches.len(), "discovered patches from zypp cache");
            return Self::new(patches);
        }

        let Some(api) = api else {
            info!(container = id, "no patch source available in container");
            return Self::new(Vec::new());
        };
        let patches = api.query(installed).await;
        info!(
            container = id,
            ecosystem = %api.ecosystem(),
            patches = patches.len(),
            "discovered patches via advisory API"
        );
        Self::new(patches)
    }

    async fn from_zypp_cache<C: ContainerRuntime>(runtime: &C, id: &str, timeout: Duration) -> Vec<SusePatch> {
        let archive = match copy_with_timeout(runtime, id, ZYPP_RAW_CACHE, timeout).await {
            Ok(archive) => archive,
            Err(e) => {
                debug!(container = id, error = %e, "zypp cache not readable");
                return Vec::new();
            }
        };
        let entries = match extract_archive(&archive) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(container = id, error = %e, "zypp cache archive unreadable");
                return Vec::new();
            }
        };

        let mut merged: BTreeMap<String, SusePatch> = BTreeMap::new();
        for entry in entries.iter().filter(|e| e.path.contains("updateinfo.xml")) {
            let Some(content) = decode_entry(&entry.path, &entry.data) else {
                continue;
            };
            match parse_updateinfo(&content) {
                Ok(patches) => {
                    for patch in patches {
                        merged.entry(patch.name.clone()).or_insert(patch);
                    }
                }
                Err(e) => warn!(path = %entry.path, error = %e, "skipping malformed updateinfo"),
            }
        }
        merged.into_values().collect()
    }
}

impl DistroBackend for SuseContainerBackend {
    type Feed = ();

    fn distro(&self) -> Distro {
        Distro::Suse
    }

    fn package_format(&self) -> PackageFormat {
        PackageFormat::Rpm
    }

    async fn fetch_advisories(&self) {}

    fn advisory_count(&self, _feed: &()) -> usize {
        self.patches.len()
    }

    async fn match_batch(&self, batch: &[InstalledPackage], _feed: &()) -> Vec<PackageResult> {
        batch
            .iter()
            .map(|pkg| {
                let mut matches = Vec::new();
                for patch in &self.patches {
                    let Some(implied) = patch
                        .packages
                        .iter()
                        .find(|implied| fuzzy_name_match(implied, &pkg.name))
                    else {
                        continue;
                    };
                    // 이미 수정 버전이 설치됨
                    if patch.fixed_versions.get(&pkg.name) == Some(&pkg.version) {
                        continue;
                    }
                    matches.push(patch.to_match(pkg, implied));
                }
                PackageResult::new(pkg, matches)
            })
            .collect()
    }
}
