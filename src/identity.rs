//! Resolution of numeric uids and gids to names
//!
//! Lookups go through the system user and group databases (NSS) using the
//! reentrant libc calls. A failed lookup is not an error: the id is stored
//! with a NULL name.

use std::collections::HashMap;
use std::ffi::CStr;
use std::os::raw::c_char;

/// Largest buffer offered to getpwuid_r / getgrgid_r before giving up
const MAX_LOOKUP_BUFFER: usize = 1 << 20;

/// A resolved user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub username: String,

    /// First field of the GECOS entry, when present
    pub full_name: Option<String>,
}

/// Source of user and group names
pub trait IdentityResolver: Send {
    fn user(&self, uid: u32) -> Option<UserIdentity>;

    fn group(&self, gid: u32) -> Option<String>;
}

/// Resolver backed by the system databases
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemIdentityResolver;

impl IdentityResolver for SystemIdentityResolver {
    fn user(&self, uid: u32) -> Option<UserIdentity> {
        let mut buf: Vec<c_char> = vec![0; 4096];
        loop {
            // SAFETY: passwd is plain old data; getpwuid_r fills it with
            // pointers into `buf`, which outlives every read below.
            let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
            let mut result: *mut libc::passwd = std::ptr::null_mut();
            let rc = unsafe {
                libc::getpwuid_r(
                    uid as libc::uid_t,
                    &mut pwd,
                    buf.as_mut_ptr(),
                    buf.len(),
                    &mut result,
                )
            };

            if rc == libc::ERANGE && buf.len() < MAX_LOOKUP_BUFFER {
                let grown = buf.len() * 2;
                buf.resize(grown, 0);
                continue;
            }
            if rc != 0 || result.is_null() || pwd.pw_name.is_null() {
                return None;
            }

            let username = unsafe { CStr::from_ptr(pwd.pw_name) }
                .to_string_lossy()
                .into_owned();
            let full_name = if pwd.pw_gecos.is_null() {
                None
            } else {
                let gecos = unsafe { CStr::from_ptr(pwd.pw_gecos) }.to_string_lossy();
                gecos
                    .split(',')
                    .next()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            };
            return Some(UserIdentity { username, full_name });
        }
    }

    fn group(&self, gid: u32) -> Option<String> {
        let mut buf: Vec<c_char> = vec![0; 4096];
        loop {
            // SAFETY: as above, group entries point into `buf`
            let mut grp: libc::group = unsafe { std::mem::zeroed() };
            let mut result: *mut libc::group = std::ptr::null_mut();
            let rc = unsafe {
                libc::getgrgid_r(
                    gid as libc::gid_t,
                    &mut grp,
                    buf.as_mut_ptr(),
                    buf.len(),
                    &mut result,
                )
            };

            if rc == libc::ERANGE && buf.len() < MAX_LOOKUP_BUFFER {
                let grown = buf.len() * 2;
                buf.resize(grown, 0);
                continue;
            }
            if rc != 0 || result.is_null() || grp.gr_name.is_null() {
                return None;
            }

            let name = unsafe { CStr::from_ptr(grp.gr_name) }
                .to_string_lossy()
                .into_owned();
            return Some(name);
        }
    }
}

/// Fixed id tables, for offline imports and tests
#[derive(Debug, Default, Clone)]
pub struct StaticIdentityResolver {
    users: HashMap<u32, UserIdentity>,
    groups: HashMap<u32, String>,
}

impl StaticIdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, uid: u32, username: &str, full_name: Option<&str>) -> Self {
        self.users.insert(
            uid,
            UserIdentity {
                username: username.to_string(),
                full_name: full_name.map(str::to_string),
            },
        );
        self
    }

    pub fn with_group(mut self, gid: u32, name: &str) -> Self {
        self.groups.insert(gid, name.to_string());
        self
    }
}

impl IdentityResolver for StaticIdentityResolver {
    fn user(&self, uid: u32) -> Option<UserIdentity> {
        self.users.get(&uid).cloned()
    }

    fn group(&self, gid: u32) -> Option<String> {
        self.groups.get(&gid).cloned()
    }
}

/// Per-run memo in front of a resolver, failures included
pub struct IdentityCache<'a> {
    resolver: &'a dyn IdentityResolver,
    users: HashMap<u32, Option<UserIdentity>>,
    groups: HashMap<u32, Option<String>>,
}

impl<'a> IdentityCache<'a> {
    pub fn new(resolver: &'a dyn IdentityResolver) -> Self {
        Self {
            resolver,
            users: HashMap::new(),
            groups: HashMap::new(),
        }
    }

    pub fn user(&mut self, uid: u32) -> Option<&UserIdentity> {
        let resolver = self.resolver;
        self.users
            .entry(uid)
            .or_insert_with(|| resolver.user(uid))
            .as_ref()
    }

    pub fn group(&mut self, gid: u32) -> Option<&str> {
        let resolver = self.resolver;
        self.groups
            .entry(gid)
            .or_insert_with(|| resolver.group(gid))
            .as_deref()
    }

    /// Number of ids that could not be resolved
    pub fn unresolved(&self) -> usize {
        self.users.values().filter(|u| u.is_none()).count()
            + self.groups.values().filter(|g| g.is_none()).count()
    }
}
