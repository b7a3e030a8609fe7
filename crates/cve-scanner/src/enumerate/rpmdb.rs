//! RPM SQLite 데이터베이스 리더
//!
//! 셸이나 `rpm` 바이너리가 없는 컨테이너에서 복사해 온 `rpmdb.sqlite`를 읽습니다.
//! `Packages` 테이블의 `blob` 컬럼은 매직 바이트가 없는 RPM 헤더입니다.
//!
//! ```text
//! +--------+--------+--------------------------+-------------+
//! | il u32 | dl u32 | index entries (il * 16B) | store (dl B)|
//! +--------+--------+--------------------------+-------------+
//! index entry: tag u32 | type u32 | offset u32 | count u32   (모두 big-endian)
//! ```

use std::path::Path;

use rusqlite::{Connection, OpenFlags};

use crate::error::CveScannerError;
use crate::types::InstalledPackage;

const TAG_NAME: u32 = 1000;
const TAG_VERSION: u32 = 1001;
const TAG_RELEASE: u32 = 1002;
const TYPE_STRING: u32 = 6;

/// 헤더 인덱스 항목 수 상한 (손상된 blob 방어)
const MAX_INDEX_ENTRIES: usize = 65_536;

/// `rpmdb.sqlite` 파일에서 설치 패키지를 읽습니다.
pub fn read_rpmdb(path: &Path) -> Result<Vec<InstalledPackage>, CveScannerError> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| CveScannerError::Parse(format!("open rpmdb {}: {e}", path.display())))?;

    let mut stmt = conn
        .prepare("SELECT blob FROM Packages")
        .map_err(|e| CveScannerError::Parse(format!("query rpmdb: {e}")))?;
    let blobs = stmt
        .query_map([], |row| row.get::<_, Vec<u8>>(0))
        .map_err(|e| CveScannerError::Parse(format!("query rpmdb: {e}")))?;

    let mut packages = Vec::new();
    for blob in blobs {
        let blob = blob.map_err(|e| CveScannerError::Parse(format!("read rpmdb row: {e}")))?;
        if let Some(pkg) = parse_header(&blob) {
            packages.push(pkg);
        }
    }
    Ok(packages)
}

/// 헤더 blob에서 NAME/VERSION/RELEASE를 추출합니다.
///
/// 버전은 `rpm -qa`의 `%{VERSION}-%{RELEASE}` 형식과 같게 맞춥니다.
pub fn parse_header(blob: &[u8]) -> Option<InstalledPackage> {
    let il = usize::try_from(read_u32(blob, 0)?).ok()?;
    let dl = usize::try_from(read_u32(blob, 4)?).ok()?;
    if il > MAX_INDEX_ENTRIES {
        return None;
    }
    let store_start = 8usize.checked_add(il.checked_mul(16)?)?;
    let store = blob.get(store_start..store_start.checked_add(dl)?)?;

    let mut name = None;
    let mut version = None;
    let mut release = None;
    for i in 0..il {
        let entry = 8 + i * 16;
        let tag = read_u32(blob, entry)?;
        let kind = read_u32(blob, entry + 4)?;
        let offset = usize::try_from(read_u32(blob, entry + 8)?).ok()?;
        if kind != TYPE_STRING {
            continue;
        }
        let slot = match tag {
            TAG_NAME => &mut name,
            TAG_VERSION => &mut version,
            TAG_RELEASE => &mut release,
            _ => continue,
        };
        *slot = read_cstr(store, offset);
    }

    Some(InstalledPackage::new(
        name?,
        format!("{}-{}", version?, release?),
    ))
}

fn read_u32(buf: &[u8], at: usize) -> Option<u32> {
    let bytes = buf.get(at..at.checked_add(4)?)?;
    Some(u32::from_be_bytes(bytes.try_into().ok()?))
}

fn read_cstr(store: &[u8], offset: usize) -> Option<String> {
    let tail = store.get(offset..)?;
    let end = tail.iter().position(|&b| b == 0)?;
    std::str::from_utf8(&tail[..end]).ok().map(str::to_owned)
}

/// 테스트용 헤더 blob 생성기
#[cfg(test)]
pub(crate) fn build_header(fields: &[(u32, &str)]) -> Vec<u8> {
    let mut index = Vec::new();
    let mut store = Vec::new();
    for (tag, value) in fields {
        index.extend_from_slice(&tag.to_be_bytes());
        index.extend_from_slice(&TYPE_STRING.to_be_bytes());
        index.extend_from_slice(&(store.len() as u32).to_be_bytes());
        index.extend_from_slice(&1u32.to_be_bytes());
        store.extend_from_slice(value.as_bytes());
        store.push(0);
    }
    let mut blob = Vec::new();
    blob.extend_from_slice(&(fields.len() as u32).to_be_bytes());
    blob.extend_from_slice(&(store.len() as u32).to_be_bytes());
    blob.extend_from_slice(&index);
    blob.extend_from_slice(&store);
    blob
}

/// 테스트용 `rpmdb.sqlite` 생성기
#[cfg(test)]
pub(crate) fn build_rpmdb(path: &Path, packages: &[(&str, &str, &str)]) {
    let conn = Connection::open(path).unwrap();
    conn.execute(
        "CREATE TABLE Packages (hnum INTEGER PRIMARY KEY AUTOINCREMENT, blob BLOB NOT NULL)",
        [],
    )
    .unwrap();
    for (name, version, release) in packages {
        let blob = build_header(&[
            (TAG_NAME, name),
            (TAG_VERSION, version),
            (TAG_RELEASE, release),
        ]);
        conn.execute("INSERT INTO Packages (blob) VALUES (?1)", [blob])
            .unwrap();
    }
}
