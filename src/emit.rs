use std::collections::HashSet;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::site::Site;

fn io_err(path: &Path, source: std::io::Error) -> Error {
    Error::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Writes the site as JSON documents under `dir` and removes documents left
/// over from trains that no longer run. Returns the number of files written.
pub fn write_site(site: &Site, dir: &Path) -> Result<usize> {
    fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let mut written: HashSet<PathBuf> = HashSet::new();

    let index_path = dir.join("index.json");
    write_json(&index_path, &site.index)?;
    written.insert(index_path);

    for route in &site.routes {
        let route_path = dir.join(&route.filepath);
        write_json(&route_path, route)?;
        written.insert(route_path);

        for train in &route.trains {
            let train_path = dir.join(&train.filepath);
            write_json(&train_path, train)?;
            written.insert(train_path);
        }
    }

    let removed = prune_stale(dir, &written)?;
    info!(
        "wrote {} files to {}, removed {} stale",
        written.len(),
        dir.display(),
        removed
    );
    Ok(written.len())
}

/// Each document lands atomically: readers see the old file or the new one.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;

    let tmp = NamedTempFile::new_in(parent).map_err(|e| io_err(parent, e))?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        serde_json::to_writer_pretty(&mut writer, value)
            .map_err(|e| io_err(path, e.into()))?;
        writer.flush().map_err(|e| io_err(path, e))?;
    }
    tmp.persist(path).map_err(|e| io_err(path, e.error))?;
    debug!("wrote {}", path.display());
    Ok(())
}

// Only looks one directory deep, which is where route folders live.
fn prune_stale(dir: &Path, keep: &HashSet<PathBuf>) -> Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir).map_err(|e| io_err(dir, e))? {
        let path = entry.map_err(|e| io_err(dir, e))?.path();
        if path.is_dir() {
            let mut remaining = 0;
            for inner in fs::read_dir(&path).map_err(|e| io_err(&path, e))? {
                let inner = inner.map_err(|e| io_err(&path, e))?.path();
                if is_json(&inner) && !keep.contains(&inner) {
                    fs::remove_file(&inner).map_err(|e| io_err(&inner, e))?;
                    removed += 1;
                } else {
                    remaining += 1;
                }
            }
            if remaining == 0 {
                fs::remove_dir(&path).map_err(|e| io_err(&path, e))?;
            }
        } else if is_json(&path) && !keep.contains(&path) {
            fs::remove_file(&path).map_err(|e| io_err(&path, e))?;
            removed += 1;
        }
    }
    Ok(removed)
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Route;
    use crate::site::SiteBuilder;
    use chrono::{TimeZone, Utc};
    use serde_json::Value;

    fn site(trains: &[(u32, &str)]) -> Site {
        let trains = trains
            .iter()
            .map(|(number, id)| crate::model::Train {
                id: (*id).into(),
                heading: "E".into(),
                number: *number,
                route: "Lake Shore Limited".into(),
                stations: vec![],
                raw: Value::Null,
            })
            .collect();
        let routes = vec![Route {
            route: "Lake Shore Limited".into(),
            trains,
        }];
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
        SiteBuilder::new("/").build(&routes, now)
    }

    #[test]
    fn writes_index_routes_and_trains() {
        let dir = tempfile::tempdir().unwrap();
        let count = write_site(&site(&[(48, "1"), (49, "2")]), dir.path()).unwrap();
        assert_eq!(count, 4);

        let index: Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("index.json")).unwrap())
                .unwrap();
        assert_eq!(index["generatedAt"], "2026-10-19T12:00:00Z");
        assert_eq!(index["routes"][0]["trains"][1]["number"], 49);

        let train: Value = serde_json::from_str(
            &fs::read_to_string(dir.path().join("lake-shore-limited/48-1.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(train["trackColor"], "#b0bec5");
    }

    #[test]
    fn trains_that_disappear_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        write_site(&site(&[(48, "1"), (49, "2")]), dir.path()).unwrap();
        fs::write(dir.path().join("notes.txt"), "keep me").unwrap();

        write_site(&site(&[(49, "2")]), dir.path()).unwrap();

        assert!(!dir.path().join("lake-shore-limited/48-1.json").exists());
        assert!(dir.path().join("lake-shore-limited/49-2.json").exists());
        assert!(dir.path().join("notes.txt").exists());
    }
}
