use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::LazyLock};

/// Voice endpoints look like `rotterdam123.discord.media:443`.
static ENDPOINT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-z\-]+)[0-9]+.*:443$").expect("valid endpoint regex"));

/// Coarse geographic bucket used to match nodes with voice connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegionGroup {
    Europe,
    Us,
    SouthAmerica,
    MiddleEast,
    Asia,
    Africa,
    Unknown,
}

impl RegionGroup {
    /// Groups that share a border or a short submarine hop.
    pub fn is_neighbour_of(self, other: RegionGroup) -> bool {
        use RegionGroup::*;
        matches!(
            (self, other),
            (Us, SouthAmerica)
                | (SouthAmerica, Us)
                | (Europe, MiddleEast)
                | (MiddleEast, Europe)
                | (Europe, Africa)
                | (Africa, Europe)
                | (MiddleEast, Asia)
                | (Asia, MiddleEast)
                | (MiddleEast, Africa)
                | (Africa, MiddleEast)
        )
    }
}

impl FromStr for RegionGroup {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().replace('-', "_").as_str() {
            "EUROPE" => Ok(Self::Europe),
            "US" => Ok(Self::Us),
            "SOUTH_AMERICA" => Ok(Self::SouthAmerica),
            "MIDDLE_EAST" => Ok(Self::MiddleEast),
            "ASIA" => Ok(Self::Asia),
            "AFRICA" => Ok(Self::Africa),
            "UNKNOWN" => Ok(Self::Unknown),
            other => Err(format!("unknown region group: {other}")),
        }
    }
}

impl fmt::Display for RegionGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Europe => "EUROPE",
            Self::Us => "US",
            Self::SouthAmerica => "SOUTH_AMERICA",
            Self::MiddleEast => "MIDDLE_EAST",
            Self::Asia => "ASIA",
            Self::Africa => "AFRICA",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

macro_rules! voice_regions {
    ($($variant:ident => ($group:ident, $id:literal, $name:literal)),+ $(,)?) => {
        /// Discord voice server regions.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum VoiceRegion {
            $($variant,)+
            Unknown,
        }

        impl VoiceRegion {
            pub const ALL: &'static [VoiceRegion] = &[$(VoiceRegion::$variant,)+];

            pub fn group(self) -> RegionGroup {
                match self {
                    $(Self::$variant => RegionGroup::$group,)+
                    Self::Unknown => RegionGroup::Unknown,
                }
            }

            /// Stable id as it appears in voice endpoints.
            pub fn id(self) -> &'static str {
                match self {
                    $(Self::$variant => $id,)+
                    Self::Unknown => "",
                }
            }

            pub fn visible_name(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                    Self::Unknown => "Unknown",
                }
            }
        }
    };
}

voice_regions! {
    Amsterdam => (Europe, "amsterdam", "Amsterdam"),
    Atlanta => (Us, "atlanta", "Atlanta"),
    Brazil => (SouthAmerica, "brazil", "Brazil"),
    Bucharest => (Europe, "bucharest", "Bucharest"),
    BuenosAires => (SouthAmerica, "buenos-aires", "Buenos Aires"),
    Dubai => (MiddleEast, "dubai", "Dubai"),
    Europe => (Europe, "europe", "Europe"),
    Finland => (Europe, "finland", "Finland"),
    Frankfurt => (Europe, "frankfurt", "Frankfurt"),
    HongKong => (Asia, "hongkong", "Hong Kong"),
    India => (Asia, "india", "India"),
    Japan => (Asia, "japan", "Japan"),
    London => (Europe, "london", "London"),
    Madrid => (Europe, "madrid", "Madrid"),
    Milan => (Europe, "milan", "Milan"),
    Montreal => (Us, "montreal", "Montreal"),
    Newark => (Us, "newark", "Newark"),
    Oregon => (Us, "oregon", "Oregon"),
    Rotterdam => (Europe, "rotterdam", "Rotterdam"),
    Russia => (Europe, "russia", "Russia"),
    SantaClara => (Us, "santa-clara", "Santa Clara"),
    Santiago => (SouthAmerica, "santiago", "Santiago"),
    Seattle => (Us, "seattle", "Seattle"),
    Singapore => (Asia, "singapore", "Singapore"),
    SouthAfrica => (Africa, "southafrica", "South Africa"),
    SouthKorea => (Asia, "south-korea", "South Korea"),
    StPete => (Us, "st-pete", "St Pete"),
    Stockholm => (Europe, "stockholm", "Stockholm"),
    Sydney => (Asia, "sydney", "Sydney"),
    TelAviv => (MiddleEast, "tel-aviv", "Tel Aviv"),
    UsCentral => (Us, "us-central", "US Central"),
    UsEast => (Us, "us-east", "US East"),
    UsSouth => (Us, "us-south", "US South"),
    UsWest => (Us, "us-west", "US West"),
}

impl VoiceRegion {
    /// Classifies a raw voice endpoint. Never fails: anything that does not
    /// match a known region id ends up as [`VoiceRegion::Unknown`].
    pub fn from_endpoint(endpoint: &str) -> VoiceRegion {
        let Some(captures) = ENDPOINT_REGEX.captures(endpoint) else {
            return VoiceRegion::Unknown;
        };
        let id = &captures[1];
        Self::ALL
            .iter()
            .copied()
            .find(|region| region.id() == id)
            .unwrap_or(VoiceRegion::Unknown)
    }
}

impl fmt::Display for VoiceRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.visible_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_known_endpoints() {
        let region = VoiceRegion::from_endpoint("rotterdam123.discord.media:443");
        assert_eq!(region, VoiceRegion::Rotterdam);
        assert_eq!(region.group(), RegionGroup::Europe);

        let region = VoiceRegion::from_endpoint("frankfurt7.discord.media:443");
        assert_eq!(region, VoiceRegion::Frankfurt);
        assert_eq!(region.group(), RegionGroup::Europe);

        assert_eq!(
            VoiceRegion::from_endpoint("us-east42.discord.media:443"),
            VoiceRegion::UsEast
        );
        assert_eq!(
            VoiceRegion::from_endpoint("santa-clara1.discord.media:443").group(),
            RegionGroup::Us
        );
    }

    #[test]
    fn test_unknown_endpoints() {
        let region = VoiceRegion::from_endpoint("bogus-host:443");
        assert_eq!(region, VoiceRegion::Unknown);
        assert_eq!(region.group(), RegionGroup::Unknown);

        // known prefix, wrong port
        assert_eq!(
            VoiceRegion::from_endpoint("rotterdam123.discord.media:80"),
            VoiceRegion::Unknown
        );
        // matching shape, unknown id
        assert_eq!(
            VoiceRegion::from_endpoint("atlantis9.discord.media:443"),
            VoiceRegion::Unknown
        );
        assert_eq!(VoiceRegion::from_endpoint(""), VoiceRegion::Unknown);
    }

    #[test]
    fn test_region_group_parsing() {
        assert_eq!("europe".parse::<RegionGroup>(), Ok(RegionGroup::Europe));
        assert_eq!("south-america".parse::<RegionGroup>(), Ok(RegionGroup::SouthAmerica));
        assert_eq!("MIDDLE_EAST".parse::<RegionGroup>(), Ok(RegionGroup::MiddleEast));
        assert!("mars".parse::<RegionGroup>().is_err());
    }
}
