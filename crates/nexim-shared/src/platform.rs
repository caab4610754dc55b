//! Client platform enumeration. Wire ids are positive; 0 is invalid.
//! A user holds at most one live session per platform.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Ios,
    Android,
    Windows,
    Macos,
    Web,
    Linux,
    Ipad,
}

impl Platform {
    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            1 => Some(Self::Ios),
            2 => Some(Self::Android),
            3 => Some(Self::Windows),
            4 => Some(Self::Macos),
            5 => Some(Self::Web),
            6 => Some(Self::Linux),
            7 => Some(Self::Ipad),
            _ => None,
        }
    }

    pub fn id(self) -> i32 {
        match self {
            Self::Ios => 1,
            Self::Android => 2,
            Self::Windows => 3,
            Self::Macos => 4,
            Self::Web => 5,
            Self::Linux => 6,
            Self::Ipad => 7,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Ios => "iOS",
            Self::Android => "Android",
            Self::Windows => "Windows",
            Self::Macos => "macOS",
            Self::Web => "Web",
            Self::Linux => "Linux",
            Self::Ipad => "iPad",
        }
    }
}
