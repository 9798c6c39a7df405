//! Common types shared by the report parser and the debug information readers.

use std::fmt;
use std::str;

/// Represents a family of CPUs.
///
/// This reduces the [`Arch`] type to a range of families with distinct properties, such as a
/// common instruction set and pointer size.
#[repr(u32)]
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum CpuFamily {
    /// Any other CPU family that is not explicitly supported.
    Unknown = 0,
    /// 32-bit little-endian CPUs using the Intel 8086 instruction set, also known as `x86`.
    Intel32 = 1,
    /// 64-bit little-endian, also known as `x86_64`.
    Amd64 = 2,
    /// 32-bit ARM.
    Arm32 = 3,
    /// 64-bit ARM (e.g. ARMv8-A).
    Arm64 = 4,
    /// 32-bit big-endian PowerPC.
    Ppc32 = 5,
    /// 64-bit big-endian PowerPC.
    Ppc64 = 6,
    /// ILP32 ABI on 64-bit ARM.
    Arm64_32 = 9,
}

impl CpuFamily {
    /// Returns the native pointer size.
    ///
    /// Returns `None` if the CPU family is unknown.
    ///
    /// ```
    /// use crashlog_common::CpuFamily;
    ///
    /// assert_eq!(CpuFamily::Amd64.pointer_size(), Some(8));
    /// assert_eq!(CpuFamily::Ppc32.pointer_size(), Some(4));
    /// ```
    pub fn pointer_size(self) -> Option<usize> {
        match self {
            CpuFamily::Unknown => None,
            CpuFamily::Amd64 | CpuFamily::Arm64 | CpuFamily::Ppc64 => Some(8),
            CpuFamily::Intel32 | CpuFamily::Arm32 | CpuFamily::Ppc32 | CpuFamily::Arm64_32 => {
                Some(4)
            }
        }
    }

    /// Returns whether the family is big-endian.
    pub fn is_big_endian(self) -> bool {
        matches!(self, CpuFamily::Ppc32 | CpuFamily::Ppc64)
    }
}

/// An error returned for an invalid [`Arch`].
#[derive(Debug)]
pub struct UnknownArchError;

impl fmt::Display for UnknownArchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown architecture")
    }
}

impl std::error::Error for UnknownArchError {}

/// An enumeration of CPU architectures found in Apple crash reports and Mach headers.
///
/// There are `*Unknown` variants for each family to support binaries where the family is known
/// but the subtype is not. Architectures can be parsed from their canonical names as well as from
/// the `Code Type` spellings used by crash reports (`"X86-64"`, `"ARM-64"`, `"PPC"`).
#[repr(u32)]
#[non_exhaustive]
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Arch {
    #[default]
    Unknown = 0,
    X86 = 101,
    X86Unknown = 199,
    Amd64 = 201,
    Amd64h = 202,
    Amd64Unknown = 299,
    Arm = 301,
    ArmV6 = 303,
    ArmV7 = 305,
    ArmV7s = 307,
    ArmV7k = 308,
    ArmUnknown = 399,
    Arm64 = 401,
    Arm64V8 = 402,
    Arm64e = 403,
    Arm64Unknown = 499,
    Ppc = 501,
    Ppc64 = 601,
    Arm64_32 = 901,
    Arm64_32Unknown = 999,
}

impl Arch {
    /// Returns the CPU family of the CPU architecture.
    pub fn cpu_family(self) -> CpuFamily {
        match self {
            Arch::Unknown => CpuFamily::Unknown,
            Arch::X86 | Arch::X86Unknown => CpuFamily::Intel32,
            Arch::Amd64 | Arch::Amd64h | Arch::Amd64Unknown => CpuFamily::Amd64,
            Arch::Arm64 | Arch::Arm64V8 | Arch::Arm64e | Arch::Arm64Unknown => CpuFamily::Arm64,
            Arch::Arm
            | Arch::ArmV6
            | Arch::ArmV7
            | Arch::ArmV7s
            | Arch::ArmV7k
            | Arch::ArmUnknown => CpuFamily::Arm32,
            Arch::Ppc => CpuFamily::Ppc32,
            Arch::Ppc64 => CpuFamily::Ppc64,
            Arch::Arm64_32 | Arch::Arm64_32Unknown => CpuFamily::Arm64_32,
        }
    }

    /// Returns the canonical name of the CPU architecture.
    ///
    /// This follows the Apple conventions for naming architectures.
    ///
    /// ```
    /// use crashlog_common::Arch;
    ///
    /// assert_eq!(Arch::Amd64.name(), "x86_64");
    /// ```
    pub fn name(self) -> &'static str {
        match self {
            Arch::Unknown => "unknown",
            Arch::X86 => "x86",
            Arch::X86Unknown => "x86_unknown",
            Arch::Amd64 => "x86_64",
            Arch::Amd64h => "x86_64h",
            Arch::Amd64Unknown => "x86_64_unknown",
            Arch::Arm => "arm",
            Arch::ArmV6 => "armv6",
            Arch::ArmV7 => "armv7",
            Arch::ArmV7s => "armv7s",
            Arch::ArmV7k => "armv7k",
            Arch::ArmUnknown => "arm_unknown",
            Arch::Arm64 => "arm64",
            Arch::Arm64V8 => "arm64v8",
            Arch::Arm64e => "arm64e",
            Arch::Arm64Unknown => "arm64_unknown",
            Arch::Ppc => "ppc",
            Arch::Ppc64 => "ppc64",
            Arch::Arm64_32 => "arm64_32",
            Arch::Arm64_32Unknown => "arm64_32_unknown",
        }
    }

    /// Returns whether this architecture is well-known.
    pub fn well_known(self) -> bool {
        !matches!(
            self,
            Arch::Unknown
                | Arch::X86Unknown
                | Arch::Amd64Unknown
                | Arch::ArmUnknown
                | Arch::Arm64Unknown
                | Arch::Arm64_32Unknown
        )
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl str::FromStr for Arch {
    type Err = UnknownArchError;

    fn from_str(string: &str) -> Result<Arch, UnknownArchError> {
        Ok(match string.to_ascii_lowercase().as_str() {
            "unknown" => Arch::Unknown,
            // this is an alias that is known among macho users
            "i386" | "x86" => Arch::X86,
            "x86_64" | "amd64" => Arch::Amd64,
            "x86_64h" => Arch::Amd64h,
            "arm" => Arch::Arm,
            "armv6" => Arch::ArmV6,
            "armv7" => Arch::ArmV7,
            "armv7s" => Arch::ArmV7s,
            "armv7k" => Arch::ArmV7k,
            "arm64" => Arch::Arm64,
            "arm64v8" => Arch::Arm64V8,
            "arm64e" => Arch::Arm64e,
            "ppc" | "powerpc" => Arch::Ppc,
            "ppc64" => Arch::Ppc64,
            "arm64_32" => Arch::Arm64_32,

            // crash report code type spellings
            "x86-64" => Arch::Amd64,
            "arm-64" => Arch::Arm64,
            "arm-64e" => Arch::Arm64e,

            _ => return Err(UnknownArchError),
        })
    }
}

/// A programming language declared in debugging information.
///
/// The language of a compilation unit decides how symbol names are presented, for instance
/// whether Objective-C method names are printed as-is.
#[repr(u32)]
#[non_exhaustive]
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Language {
    #[default]
    Unknown = 0,
    C = 1,
    Cpp = 2,
    D = 3,
    Go = 4,
    ObjC = 5,
    ObjCpp = 6,
    Rust = 7,
    Swift = 8,
}

impl Language {
    /// Returns the lowercase name of the language, suitable for serialization.
    pub fn name(self) -> &'static str {
        match self {
            Language::Unknown => "unknown",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::D => "d",
            Language::Go => "go",
            Language::ObjC => "objc",
            Language::ObjCpp => "objcpp",
            Language::Rust => "rust",
            Language::Swift => "swift",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let formatted = match *self {
            Language::Unknown => "unknown",
            Language::C => "C",
            Language::Cpp => "C++",
            Language::D => "D",
            Language::Go => "Go",
            Language::ObjC => "Objective-C",
            Language::ObjCpp => "Objective-C++",
            Language::Rust => "Rust",
            Language::Swift => "Swift",
        };

        f.write_str(formatted)
    }
}
