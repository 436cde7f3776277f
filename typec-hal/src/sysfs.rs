//! Accessing the sysfs.
//!
//! All paths are resolved relative to a single root directory, which is `/`
//! on a real system and a fixture tree in tests. Leading slashes are ignored,
//! so kernel device paths such as `/devices/...` can be joined directly.

use std::{
    collections::BTreeMap,
    fmt,
    fs::File,
    io::{Read, Write},
    marker::PhantomData,
};

use camino::{Utf8Path, Utf8PathBuf};
use rustix::{
    fd::{AsFd, OwnedFd},
    fs::{accessat, openat, Access, AtFlags, Dir, FileType, Mode, OFlags, CWD},
    path::Arg,
};

use crate::{types::*, Error, Result};

pub const SYS_CLASS_TYPEC: &str = "sys/class/typec";

const PARTNER_SUFFIX: &str = "-partner";

trait PropertyReader {
    type Read;

    fn read(s: &str) -> Result<Self::Read>;
}

/// A readable sysfs attribute.
pub trait PropertyReadable: fmt::Debug {
    type Read;

    /// Reads the attribute, with surrounding whitespace trimmed.
    fn get(&self) -> Result<Self::Read>;
}

/// A sysfs attribute that accepts raw text writes.
pub trait PropertyWritable: PropertyReadable {
    fn set(&self, value: &str) -> Result<()>;
}

struct PropertyImpl<'fs, P: PropertyReader> {
    sysfs: &'fs Sysfs,
    path: Utf8PathBuf,
    _impl: PhantomData<P>,
}

impl<P: PropertyReader> fmt::Debug for PropertyImpl<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(property:{})", self.path)
    }
}

impl<'fs, P: PropertyReader> PropertyImpl<'fs, P> {
    fn new(sysfs: &'fs Sysfs, path: Utf8PathBuf) -> Self {
        Self {
            sysfs,
            path,
            _impl: PhantomData,
        }
    }
}

impl<P: PropertyReader> PropertyReadable for PropertyImpl<'_, P> {
    type Read = P::Read;

    fn get(&self) -> Result<P::Read> {
        P::read(&self.sysfs.read(&self.path)?)
    }
}

impl<P: PropertyReader> PropertyWritable for PropertyImpl<'_, P> {
    fn set(&self, value: &str) -> Result<()> {
        self.sysfs.write(&self.path, value)
    }
}

struct PropertyText;

impl PropertyReader for PropertyText {
    type Read = String;

    fn read(s: &str) -> Result<Self::Read> {
        Ok(s.to_owned())
    }
}

/// Role attributes, where only the bracketed choice matters.
struct PropertyActiveChoice;

impl PropertyReader for PropertyActiveChoice {
    type Read = String;

    fn read(s: &str) -> Result<Self::Read> {
        Ok(active_choice(s).to_owned())
    }
}

/// Boolean attributes printed as `yes`/`no`; only the first letter counts.
struct PropertyFlagYes;

impl PropertyReader for PropertyFlagYes {
    type Read = bool;

    fn read(s: &str) -> Result<Self::Read> {
        Ok(s.starts_with('y'))
    }
}

/// A directory entry returned by [`Sysfs::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub file_type: FileType,
}

/// A handle to the root that all sysfs and configfs paths are resolved
/// against.
#[derive(Debug)]
pub struct Sysfs {
    dfd: OwnedFd,
    root: Utf8PathBuf,
}

impl Sysfs {
    /// Opens the real system root.
    pub fn system() -> Result<Self> {
        Self::open("/")
    }

    pub fn open(root: impl Into<Utf8PathBuf>) -> Result<Self> {
        let root = root.into();
        let dfd = openat(
            CWD,
            root.as_str(),
            OFlags::RDONLY | OFlags::DIRECTORY | OFlags::CLOEXEC,
            Mode::empty(),
        )?;
        Ok(Self { dfd, root })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn relative(path: &Utf8Path) -> &str {
        match path.as_str().trim_start_matches('/') {
            "" => ".",
            rel => rel,
        }
    }

    /// Reads a file exactly as stored.
    pub fn read_raw(&self, path: impl AsRef<Utf8Path>) -> Result<String> {
        let fd = openat(
            &self.dfd,
            Self::relative(path.as_ref()),
            OFlags::RDONLY | OFlags::CLOEXEC,
            Mode::empty(),
        )?;
        let mut file = File::from(fd);
        let mut s = "".to_owned();
        file.read_to_string(&mut s)?;
        Ok(s)
    }

    /// Reads a file with surrounding whitespace trimmed.
    pub fn read(&self, path: impl AsRef<Utf8Path>) -> Result<String> {
        let s = self.read_raw(path)?;
        Ok(s.trim().to_owned())
    }

    /// Replaces the contents of an existing file.
    pub fn write(&self, path: impl AsRef<Utf8Path>, value: &str) -> Result<()> {
        let fd = openat(
            &self.dfd,
            Self::relative(path.as_ref()),
            OFlags::WRONLY | OFlags::TRUNC | OFlags::CLOEXEC,
            Mode::empty(),
        )?;
        let mut file = File::from(fd);
        file.write_all(value.as_bytes())?;
        Ok(())
    }

    pub fn exists(&self, path: impl AsRef<Utf8Path>) -> bool {
        accessat(
            &self.dfd,
            Self::relative(path.as_ref()),
            Access::EXISTS,
            AtFlags::empty(),
        )
        .is_ok()
    }

    pub fn is_readable(&self, path: impl AsRef<Utf8Path>) -> bool {
        accessat(
            &self.dfd,
            Self::relative(path.as_ref()),
            Access::READ_OK,
            AtFlags::empty(),
        )
        .is_ok()
    }

    /// Lists a directory, skipping `.` and `..`.
    pub fn list(&self, path: impl AsRef<Utf8Path>) -> Result<Vec<Entry>> {
        let fd = openat(
            &self.dfd,
            Self::relative(path.as_ref()),
            OFlags::RDONLY | OFlags::DIRECTORY | OFlags::CLOEXEC,
            Mode::empty(),
        )?;

        let mut entries = vec![];
        for entry in Dir::read_from(fd.as_fd())? {
            let entry = entry?;
            let file_name = entry.file_name();
            let name = file_name.as_str()?;
            if name == "." || name == ".." {
                continue;
            }

            entries.push(Entry {
                name: name.to_owned(),
                file_type: entry.file_type(),
            });
        }

        Ok(entries)
    }

    /// Resolves symlinks in `path`, returning a path relative to the root.
    pub fn canonicalize(&self, path: impl AsRef<Utf8Path>) -> Result<Utf8PathBuf> {
        let root = self.root.canonicalize_utf8()?;
        let full = self
            .root
            .join(Self::relative(path.as_ref()))
            .canonicalize_utf8()?;
        let rel = full
            .strip_prefix(&root)
            .map_err(|_| Error::Io(std::io::ErrorKind::NotFound))?;
        Ok(Utf8Path::new("/").join(rel))
    }

    pub fn typec(&self) -> Typec<'_> {
        Typec { sysfs: self }
    }
}

/// A port as found while enumerating the Type-C class directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortEntry {
    pub name: PortName,
    /// Whether a partner entry exists for this port.
    pub connected: bool,
}

/// The Type-C class directory.
#[derive(Debug, Clone, Copy)]
pub struct Typec<'fs> {
    sysfs: &'fs Sysfs,
}

impl<'fs> Typec<'fs> {
    /// Lists all ports, sorted by name.
    ///
    /// `portN-partner` marks `portN` as connected. Other compound entries
    /// (cables, plugs, alternate modes) are not ports and are skipped.
    pub fn ports(&self) -> Result<Vec<PortEntry>> {
        let mut names = BTreeMap::new();

        for entry in self.sysfs.list(SYS_CLASS_TYPEC)? {
            if !matches!(entry.file_type, FileType::Symlink | FileType::Directory) {
                continue;
            }

            if let Some(base) = entry.name.strip_suffix(PARTNER_SUFFIX) {
                let Ok(name) = PortName::new(base) else {
                    continue;
                };
                names.insert(name, true);
            } else if !entry.name.contains(['-', '.']) {
                let Ok(name) = PortName::new(entry.name) else {
                    continue;
                };
                names.entry(name).or_insert(false);
            }
        }

        Ok(names
            .into_iter()
            .map(|(name, connected)| PortEntry { name, connected })
            .collect())
    }

    pub fn port(&self, name: &PortName) -> TypecPort<'fs> {
        TypecPort {
            sysfs: self.sysfs,
            dir: Utf8Path::new(SYS_CLASS_TYPEC).join(name.as_str()),
            partner_dir: Utf8Path::new(SYS_CLASS_TYPEC).join(name.partner()),
        }
    }
}

/// A single Type-C port directory.
#[derive(Debug, Clone)]
pub struct TypecPort<'fs> {
    sysfs: &'fs Sysfs,
    dir: Utf8PathBuf,
    partner_dir: Utf8PathBuf,
}

impl<'fs> TypecPort<'fs> {
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    /// Returns the control file for the given role type.
    ///
    /// Mode switches go through `port_type`, except on controllers that don't
    /// provide it (such as UCSI), where `data_role` is used instead.
    pub fn role_node(&self, role_type: RoleType) -> Utf8PathBuf {
        match role_type {
            RoleType::Mode => {
                let port_type = self.dir.join("port_type");
                if self.sysfs.exists(&port_type) {
                    port_type
                } else {
                    self.dir.join("data_role")
                }
            }
            RoleType::Data => self.dir.join("data_role"),
            RoleType::Power => self.dir.join("power_role"),
        }
    }

    /// The active choice of the role control file for the given type.
    pub fn role(
        &self,
        role_type: RoleType,
    ) -> impl PropertyWritable<Read = String> + 'fs {
        PropertyImpl::<'fs, PropertyActiveChoice>::new(self.sysfs, self.role_node(role_type))
    }

    /// The negotiated power operation mode, as raw text.
    pub fn power_operation_mode(&self) -> impl PropertyReadable<Read = String> + 'fs {
        PropertyImpl::<'fs, PropertyText>::new(
            self.sysfs,
            self.dir.join("power_operation_mode"),
        )
    }

    /// Whether the partner entry for this port currently exists.
    pub fn has_partner(&self) -> bool {
        self.sysfs.exists(&self.partner_dir)
    }

    /// The partner's accessory mode, as raw text.
    pub fn partner_accessory_mode(&self) -> impl PropertyReadable<Read = String> + 'fs {
        PropertyImpl::<'fs, PropertyText>::new(self.sysfs, self.partner_dir.join("accessory_mode"))
    }

    pub fn partner_supports_usb_power_delivery(
        &self,
    ) -> impl PropertyReadable<Read = bool> + 'fs {
        PropertyImpl::<'fs, PropertyFlagYes>::new(
            self.sysfs,
            self.partner_dir.join("supports_usb_power_delivery"),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use googletest::prelude::*;

    use super::*;

    fn fixture() -> (tempfile::TempDir, Sysfs) {
        let dir = tempfile::tempdir().unwrap();
        let typec = dir.path().join(SYS_CLASS_TYPEC);
        for sub in ["port0", "port0-partner", "port0-cable", "port0.0", "port1"] {
            fs::create_dir_all(typec.join(sub)).unwrap();
        }
        fs::write(typec.join("port0/data_role"), "[host] device\n").unwrap();
        fs::write(typec.join("port0/power_role"), "[source] sink\n").unwrap();
        fs::write(typec.join("port1/data_role"), "host [device]\n").unwrap();
        fs::write(typec.join("port1/port_type"), "[dual] source sink\n").unwrap();
        fs::write(typec.join("port0-partner/supports_usb_power_delivery"), "yes\n").unwrap();

        let sysfs = Sysfs::open(dir.path().to_str().unwrap()).unwrap();
        (dir, sysfs)
    }

    #[test]
    fn enumerates_ports() {
        let (_dir, sysfs) = fixture();

        assert_that!(
            sysfs.typec().ports(),
            ok(elements_are![
                eq(&PortEntry {
                    name: PortName::new("port0").unwrap(),
                    connected: true
                }),
                eq(&PortEntry {
                    name: PortName::new("port1").unwrap(),
                    connected: false
                }),
            ])
        );
    }

    #[test]
    fn mode_node_falls_back_to_data_role() {
        let (_dir, sysfs) = fixture();
        let typec = sysfs.typec();

        let port0 = typec.port(&PortName::new("port0").unwrap());
        assert_that!(
            port0.role_node(RoleType::Mode).as_str(),
            eq("sys/class/typec/port0/data_role")
        );

        let port1 = typec.port(&PortName::new("port1").unwrap());
        assert_that!(
            port1.role_node(RoleType::Mode).as_str(),
            eq("sys/class/typec/port1/port_type")
        );
        assert_that!(
            port1.role_node(RoleType::Power).as_str(),
            eq("sys/class/typec/port1/power_role")
        );
    }

    #[test]
    fn reads_roles_and_flags() {
        let (_dir, sysfs) = fixture();
        let port0 = sysfs.typec().port(&PortName::new("port0").unwrap());

        assert_that!(port0.role(RoleType::Data).get(), ok(eq("host")));
        assert_that!(port0.role(RoleType::Power).get(), ok(eq("source")));
        assert_that!(port0.partner_supports_usb_power_delivery().get(), ok(eq(&true)));
        assert_that!(port0.has_partner(), is_true());
        assert_that!(
            port0.power_operation_mode().get(),
            err(eq(&Error::Io(std::io::ErrorKind::NotFound)))
        );
    }

    #[test]
    fn written_role_reads_back() {
        let (_dir, sysfs) = fixture();
        let port0 = sysfs.typec().port(&PortName::new("port0").unwrap());

        for role in ["source", "sink"] {
            port0.role(RoleType::Power).set(role).unwrap();
            assert_that!(port0.role(RoleType::Power).get(), ok(eq(role)));
        }
        for role in ["host", "device"] {
            port0.role(RoleType::Data).set(role).unwrap();
            assert_that!(port0.role(RoleType::Data).get(), ok(eq(role)));
        }
    }

    #[test]
    fn writes_never_create_files() {
        let (dir, sysfs) = fixture();

        assert_that!(
            sysfs.write("sys/class/typec/port0/nonexistent", "x"),
            err(anything())
        );
        assert_that!(
            dir.path().join("sys/class/typec/port0/nonexistent").exists(),
            is_false()
        );
    }

    #[test]
    fn canonicalize_stays_relative_to_root() {
        let (dir, sysfs) = fixture();
        std::os::unix::fs::symlink(
            dir.path().join("sys/class/typec/port0"),
            dir.path().join("sys/class/typec/link0"),
        )
        .unwrap();

        assert_that!(
            sysfs.canonicalize("/sys/class/typec/link0"),
            ok(eq(&Utf8PathBuf::from("/sys/class/typec/port0")))
        );
    }
}
