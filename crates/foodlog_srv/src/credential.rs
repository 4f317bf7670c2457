//! Trust-on-first-use user credentials.
//!
//! Passwords are stored and compared as plaintext. This mirrors the
//! existing clients' expectations and is not a security boundary.

use crate::*;

/// The outcome of [check_or_register].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Known user, password matches.
    Match,

    /// Known user, password differs.
    Mismatch,

    /// Unknown user, now registered with the given password.
    Registered,

    /// Empty user name.
    Rejected,
}

impl Verdict {
    /// The `pass` value reported to clients.
    pub fn pass(&self) -> &'static str {
        match self {
            Self::Match => "yes",
            Self::Mismatch | Self::Rejected => "no",
            Self::Registered => "new",
        }
    }
}

/// Verify `password` for `name`, registering `name` with `password` if
/// it has never been seen.
///
/// The lookup and the registration happen under the user collection's
/// write lock, so of two racing first uses exactly one registers.
pub fn check_or_register(
    users: &Collection<UserCredential>,
    name: &str,
    password: &str,
) -> std::io::Result<Verdict> {
    if name.is_empty() {
        return Ok(Verdict::Rejected);
    }

    let mut txn = users.lock();

    if let Some(user) = txn.get(name) {
        return Ok(if user.password == password {
            Verdict::Match
        } else {
            Verdict::Mismatch
        });
    }

    txn.push(UserCredential {
        name: name.to_string(),
        password: password.to_string(),
    });
    txn.persist()?;
    txn.commit();

    tracing::info!(name, "Registered new user");

    Ok(Verdict::Registered)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;

    fn users() -> (tempfile::TempDir, Collection<UserCredential>) {
        let dir = tempfile::tempdir().unwrap();
        let users =
            Collection::load(dir.path().join(USER_FILE)).unwrap();
        (dir, users)
    }

    #[test]
    fn empty_name_rejected_without_mutation() {
        let (dir, users) = users();

        for password in ["", "pw", "anything at all"] {
            assert_eq!(
                Verdict::Rejected,
                check_or_register(&users, "", password).unwrap()
            );
        }

        assert!(users.all().is_empty());
        assert!(!dir.path().join(USER_FILE).exists());
    }

    #[test]
    fn first_use_registers_then_matches() {
        let (_dir, users) = users();

        assert_eq!(
            Verdict::Registered,
            check_or_register(&users, "ann", "p1").unwrap()
        );
        assert_eq!(
            Verdict::Match,
            check_or_register(&users, "ann", "p1").unwrap()
        );
        assert_eq!(
            Verdict::Mismatch,
            check_or_register(&users, "ann", "p2").unwrap()
        );
        assert_eq!(1, users.all().len());
    }

    #[test]
    fn registration_is_persisted() {
        let (_dir, users) = users();

        check_or_register(&users, "ann", "p1").unwrap();

        let reloaded =
            Collection::<UserCredential>::load(users.path().to_path_buf())
                .unwrap();
        assert_eq!(
            vec![UserCredential {
                name: "ann".into(),
                password: "p1".into(),
            }],
            *reloaded.all(),
        );
    }

    #[test]
    fn failed_registration_is_not_kept() {
        let (_dir, users) = users();

        // a non-empty directory where the file should go
        // makes the rewrite fail
        std::fs::create_dir(users.path()).unwrap();
        std::fs::write(users.path().join("keep"), b"x").unwrap();

        assert!(check_or_register(&users, "ann", "p1").is_err());
        assert!(users.all().is_empty());

        std::fs::remove_dir_all(users.path()).unwrap();

        // nothing was remembered, so ann is still new
        assert_eq!(
            Verdict::Registered,
            check_or_register(&users, "ann", "p2").unwrap()
        );
        assert_eq!(
            Verdict::Match,
            check_or_register(&users, "ann", "p2").unwrap()
        );
    }

    #[test]
    fn names_are_case_sensitive() {
        let (_dir, users) = users();

        check_or_register(&users, "ann", "p1").unwrap();
        assert_eq!(
            Verdict::Registered,
            check_or_register(&users, "Ann", "p2").unwrap()
        );
    }

    #[test]
    fn verdict_pass_values() {
        assert_eq!("yes", Verdict::Match.pass());
        assert_eq!("no", Verdict::Mismatch.pass());
        assert_eq!("new", Verdict::Registered.pass());
        assert_eq!("no", Verdict::Rejected.pass());
    }

    #[test]
    fn racing_first_use_registers_once() {
        const COUNT: usize = 8;

        let (_dir, users) = users();
        let users = Arc::new(users);
        let b = Arc::new(std::sync::Barrier::new(COUNT));

        let mut all = Vec::with_capacity(COUNT);

        for i in 0..COUNT {
            let users = users.clone();
            let b = b.clone();
            all.push(std::thread::spawn(move || {
                b.wait();
                check_or_register(&users, "ann", &format!("p{i}")).unwrap()
            }));
        }

        let verdicts = all
            .into_iter()
            .map(|j| j.join().unwrap())
            .collect::<Vec<_>>();

        assert_eq!(
            1,
            verdicts.iter().filter(|v| **v == Verdict::Registered).count()
        );
        assert_eq!(1, users.all().len());

        // whoever registered first owns the name now
        let winner = users.get("ann").unwrap().password;
        assert_eq!(Verdict::Match, check_or_register(&users, "ann", &winner).unwrap());
    }
}
