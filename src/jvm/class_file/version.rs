use crate::jvm::Serialize;
use byteorder::WriteBytesExt;
use std::io::Result;

/// Version of the class file, which is used to verify that the JVM has the
/// necessary features to interpret the class
///
/// `StackMapTable` frames are only mandatory from [`Version::JAVA7`] onwards, but they are always
/// emitted.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct Version {
    pub minor_version: u16,
    pub major_version: u16,
}

impl Version {
    const fn major(major_version: u16) -> Version {
        Version {
            minor_version: 0,
            major_version,
        }
    }

    pub const JAVA1_1: Version = Version {
        minor_version: 3,
        major_version: 45,
    };
    pub const JAVA1_2: Version = Version::major(46);
    pub const JAVA1_3: Version = Version::major(47);
    pub const JAVA1_4: Version = Version::major(48);
    pub const JAVA5: Version = Version::major(49);
    pub const JAVA6: Version = Version::major(50);
    pub const JAVA7: Version = Version::major(51);
    pub const JAVA8: Version = Version::major(52);
    pub const JAVA9: Version = Version::major(53);
    pub const JAVA10: Version = Version::major(54);
    pub const JAVA11: Version = Version::major(55);
    pub const JAVA12: Version = Version::major(56);
    pub const JAVA13: Version = Version::major(57);
    pub const JAVA14: Version = Version::major(58);
    pub const JAVA15: Version = Version::major(59);
    pub const JAVA16: Version = Version::major(60);
    pub const JAVA17: Version = Version::major(61);
    pub const JAVA18: Version = Version::major(62);
    pub const JAVA19: Version = Version::major(63);
    pub const JAVA20: Version = Version::major(64);
    pub const JAVA21: Version = Version::major(65);
}

impl Default for Version {
    fn default() -> Version {
        Version::JAVA7
    }
}

impl Serialize for Version {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        self.minor_version.serialize(writer)?;
        self.major_version.serialize(writer)?;
        Ok(())
    }
}
