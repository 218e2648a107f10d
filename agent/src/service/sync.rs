use super::ServiceError;
use crate::{rcon::Rcon, serverprops};
use common::constants::{OPS_NAME, SERVER_PROPS_NAME, WHITELIST_PROPS};
use serde::Deserialize;
use std::{collections::HashSet, path::Path};

/// Commands a convergence pass had to issue
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Convergence {
    pub switched: Option<bool>,
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl Convergence {
    pub fn is_noop(&self) -> bool {
        self.switched.is_none() && self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Deserialize)]
struct OpsEntry {
    name: String,
}

/// Elements of `want` missing from `have`, in the order of `want`
pub fn difference_set(have: &[String], want: &[String]) -> Vec<String> {
    let have: HashSet<&str> = have.iter().map(String::as_str).collect();
    want.iter().filter(|w| !have.contains(w.as_str())).cloned().collect()
}

/// Bring the whitelist of the running server in line with the declared one.
///
/// The switch state comes from server.properties, the member list from the
/// server itself. Nothing is written when both already match, and members are
/// left alone while the whitelist is disabled.
pub async fn sync_whitelist(
    rcon: &mut Rcon,
    data_dir: &Path,
    enabled: bool,
    users: &[String],
) -> Result<Convergence, ServiceError> {
    let path = data_dir.join(SERVER_PROPS_NAME);
    let props = serverprops::parse_from_path(&path)
        .await
        .map_err(|source| ServiceError::Read { path, source })?;
    let current = match props.get(WHITELIST_PROPS).map(|v| v.trim()) {
        None | Some("") => false,
        Some(v) => parse_bool(v).ok_or_else(|| ServiceError::Property {
            key: WHITELIST_PROPS.to_string(),
            value: v.to_string(),
        })?,
    };

    let mut done = Convergence::default();
    if current != enabled {
        rcon.whitelist_switch(enabled).await?;
        done.switched = Some(enabled);
    }
    if !enabled {
        return Ok(done);
    }

    let listed = rcon.list_whitelist().await?;
    for user in difference_set(&listed, users) {
        rcon.whitelist("add", &user).await?;
        done.added.push(user);
    }
    for user in difference_set(users, &listed) {
        rcon.whitelist("remove", &user).await?;
        done.removed.push(user);
    }
    Ok(done)
}

/// Bring the operator list in ops.json in line with the declared one.
///
/// A missing ops.json is an empty list. Removals still run when some players
/// could not be made operators; that failure is reported afterwards.
pub async fn sync_ops(rcon: &mut Rcon, data_dir: &Path, users: &[String]) -> Result<Convergence, ServiceError> {
    let current = read_ops(&data_dir.join(OPS_NAME)).await?;
    let mut done = Convergence {
        added: difference_set(&current, users),
        removed: difference_set(users, &current),
        ..Default::default()
    };
    let promoted = if done.added.is_empty() {
        Ok(())
    } else {
        rcon.op(&done.added).await
    };
    if let Err(crate::rcon::RconError::OpFailed(missing)) = &promoted {
        done.added.retain(|u| !missing.contains(u));
    }
    if !done.removed.is_empty() {
        rcon.deop(&done.removed).await?;
    }
    promoted?;
    Ok(done)
}

async fn read_ops(path: &Path) -> Result<Vec<String>, ServiceError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(ServiceError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    let entries: Vec<OpsEntry> = serde_json::from_str(&content)?;
    Ok(entries.into_iter().map(|e| e.name).collect())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rcon::{PLAYER_NOT_EXIST, tests::MockConsole};

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn data_dir(props: &str, ops: Option<&str>) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SERVER_PROPS_NAME), props).unwrap();
        if let Some(ops) = ops {
            std::fs::write(dir.path().join(OPS_NAME), ops).unwrap();
        }
        dir
    }

    #[test]
    fn test_difference_set_keeps_order() {
        let have = strings(&["b", "x"]);
        let want = strings(&["c", "b", "a"]);
        assert_eq!(difference_set(&have, &want), vec!["c", "a"]);
        assert!(difference_set(&want, &[]).is_empty());
        assert_eq!(difference_set(&[], &want), want);
    }

    #[tokio::test]
    async fn test_whitelist_converges_to_declared_members() {
        let dir = data_dir("white-list=true\n", None);
        let mock = MockConsole::with_responses(&["There are 2 whitelisted players: alice, bob"]);
        let mut rcon = Rcon::new(Box::new(mock.clone()));
        let done = sync_whitelist(&mut rcon, dir.path(), true, &strings(&["alice"]))
            .await
            .unwrap();
        assert_eq!(done.removed, vec!["bob"]);
        assert!(done.added.is_empty());
        assert_eq!(mock.sent(), vec!["whitelist list", "whitelist remove bob"]);
    }

    #[tokio::test]
    async fn test_whitelist_second_pass_changes_nothing() {
        let dir = data_dir("white-list=true\n", None);
        let mock = MockConsole::with_responses(&["There are 1 whitelisted players: alice"]);
        let mut rcon = Rcon::new(Box::new(mock.clone()));
        let done = sync_whitelist(&mut rcon, dir.path(), true, &strings(&["alice"]))
            .await
            .unwrap();
        assert!(done.is_noop());
        assert_eq!(mock.sent(), vec!["whitelist list"]);
    }

    #[tokio::test]
    async fn test_whitelist_switches_on_then_adds() {
        let dir = data_dir("white-list=false\n", None);
        let mock = MockConsole::default()
            .answer("whitelist list", "There are no whitelisted players")
            .answer("whitelist on", "Whitelist is now turned on");
        let mut rcon = Rcon::new(Box::new(mock.clone()));
        let done = sync_whitelist(&mut rcon, dir.path(), true, &strings(&["user1", "user2"]))
            .await
            .unwrap();
        assert_eq!(done.switched, Some(true));
        assert_eq!(
            mock.sent(),
            vec!["whitelist on", "whitelist list", "whitelist add user1", "whitelist add user2"]
        );
    }

    #[tokio::test]
    async fn test_disabled_whitelist_leaves_members_alone() {
        let dir = data_dir("white-list=true\n", None);
        let mock = MockConsole::default();
        let mut rcon = Rcon::new(Box::new(mock.clone()));
        let done = sync_whitelist(&mut rcon, dir.path(), false, &strings(&["alice"]))
            .await
            .unwrap();
        assert_eq!(done.switched, Some(false));
        assert_eq!(mock.sent(), vec!["whitelist off"]);

        // already off: nothing to do at all
        let dir = data_dir("motd=hi\n", None);
        let mock = MockConsole::default();
        let mut rcon = Rcon::new(Box::new(mock.clone()));
        assert!(
            sync_whitelist(&mut rcon, dir.path(), false, &[])
                .await
                .unwrap()
                .is_noop()
        );
        assert!(mock.sent().is_empty());
    }

    #[tokio::test]
    async fn test_whitelist_rejects_garbled_property() {
        let dir = data_dir("white-list=maybe\n", None);
        let mock = MockConsole::default();
        let mut rcon = Rcon::new(Box::new(mock.clone()));
        let err = sync_whitelist(&mut rcon, dir.path(), true, &[]).await.unwrap_err();
        assert!(matches!(err, ServiceError::Property { .. }));
        assert!(mock.sent().is_empty());
    }

    #[tokio::test]
    async fn test_ops_converge() {
        let dir = data_dir(
            "",
            Some(r#"[{"uuid":"1","name":"alice","level":4,"bypassesPlayerLimit":false},{"uuid":"2","name":"carol","level":4,"bypassesPlayerLimit":false}]"#),
        );
        let mock = MockConsole::default();
        let mut rcon = Rcon::new(Box::new(mock.clone()));
        let done = sync_ops(&mut rcon, dir.path(), &strings(&["alice", "bob"])).await.unwrap();
        assert_eq!(done.added, vec!["bob"]);
        assert_eq!(done.removed, vec!["carol"]);
        assert_eq!(mock.sent(), vec!["op bob", "deop carol"]);
    }

    #[tokio::test]
    async fn test_ops_already_in_place_sends_nothing() {
        let dir = data_dir(
            "",
            Some(r#"[{"uuid":"1","name":"alice","level":4},{"uuid":"2","name":"bob","level":4}]"#),
        );
        let mock = MockConsole::default();
        let mut rcon = Rcon::new(Box::new(mock.clone()));
        let done = sync_ops(&mut rcon, dir.path(), &strings(&["bob", "alice"])).await.unwrap();
        assert!(done.is_noop());
        assert!(mock.sent().is_empty());
    }

    #[tokio::test]
    async fn test_ops_missing_file_is_empty() {
        let dir = data_dir("", None);
        let mock = MockConsole::default();
        let mut rcon = Rcon::new(Box::new(mock.clone()));
        let done = sync_ops(&mut rcon, dir.path(), &strings(&["alice"])).await.unwrap();
        assert_eq!(done.added, vec!["alice"]);
        assert_eq!(mock.sent(), vec!["op alice"]);

        let mock = MockConsole::default();
        let mut rcon = Rcon::new(Box::new(mock.clone()));
        assert!(sync_ops(&mut rcon, dir.path(), &[]).await.unwrap().is_noop());
        assert!(mock.sent().is_empty());
    }

    #[tokio::test]
    async fn test_ops_removals_run_despite_missing_players() {
        let dir = data_dir("", Some(r#"[{"name":"carol"}]"#));
        let mock = MockConsole::default().answer("op ghost", PLAYER_NOT_EXIST);
        let mut rcon = Rcon::new(Box::new(mock.clone()));
        let err = sync_ops(&mut rcon, dir.path(), &strings(&["ghost"])).await.unwrap_err();
        assert!(matches!(err, ServiceError::Rcon(crate::rcon::RconError::OpFailed(ref m)) if m == &["ghost"]));
        assert_eq!(mock.sent(), vec!["op ghost", "deop carol"]);
    }

    #[tokio::test]
    async fn test_ops_malformed_file() {
        let dir = data_dir("", Some("{not json"));
        let mut rcon = Rcon::new(Box::new(MockConsole::default()));
        let err = sync_ops(&mut rcon, dir.path(), &[]).await.unwrap_err();
        assert!(matches!(err, ServiceError::Ops(_)));
    }
}
