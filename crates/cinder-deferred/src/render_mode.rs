//! G-buffer visualization modes.

use serde::{Deserialize, Serialize};

/// What the final pass writes to the output framebuffer.
///
/// Anything other than [`DeferredRenderMode::Default`] replaces lighting and
/// post-processing with a debug pass over the G-buffer.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DeferredRenderMode {
    /// Fully lit and post-processed.
    #[default]
    Default = 0,
    Position = 1,
    /// World position wrapped to a unit grid.
    PositionMod = 2,
    ViewPosition = 3,
    ViewPositionMod = 4,
    Depth = 5,
    DepthMod = 6,
    Normal = 7,
    ViewNormal = 8,
    Albedo = 9,
    Specular = 10,
    Roughness = 11,
    AmbientOcclusion = 12,
}

impl DeferredRenderMode {
    pub const ALL: [Self; 13] = [
        Self::Default,
        Self::Position,
        Self::PositionMod,
        Self::ViewPosition,
        Self::ViewPositionMod,
        Self::Depth,
        Self::DepthMod,
        Self::Normal,
        Self::ViewNormal,
        Self::Albedo,
        Self::Specular,
        Self::Roughness,
        Self::AmbientOcclusion,
    ];

    /// Cycle to the next mode, wrapping back to `Default`.
    #[must_use]
    pub fn next(self) -> Self {
        let index = self as usize;
        Self::ALL[(index + 1) % Self::ALL.len()]
    }

    /// Value written to the debug UBO.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Default => "Default",
            Self::Position => "World Position",
            Self::PositionMod => "World Position (Modulus)",
            Self::ViewPosition => "View Position",
            Self::ViewPositionMod => "View Position (Modulus)",
            Self::Depth => "Depth",
            Self::DepthMod => "Depth (Modulus)",
            Self::Normal => "Normals",
            Self::ViewNormal => "View Normals",
            Self::Albedo => "Albedo",
            Self::Specular => "Specular",
            Self::Roughness => "Roughness",
            Self::AmbientOcclusion => "Ambient Occlusion",
        }
    }

    /// Whether the SSAO pass is needed to produce this mode.
    pub const fn needs_ambient_occlusion(self) -> bool {
        matches!(self, Self::Default | Self::AmbientOcclusion)
    }
}

impl std::fmt::Display for DeferredRenderMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycling_visits_every_mode() {
        let mut mode = DeferredRenderMode::Default;
        for expected in DeferredRenderMode::ALL.iter().skip(1) {
            mode = mode.next();
            assert_eq!(mode, *expected);
        }
        assert_eq!(mode.next(), DeferredRenderMode::Default);
    }

    #[test]
    fn discriminants_match_table_order() {
        for (index, mode) in DeferredRenderMode::ALL.iter().enumerate() {
            assert_eq!(mode.as_u32() as usize, index);
        }
        assert_eq!(DeferredRenderMode::PositionMod.to_string(), "World Position (Modulus)");
    }
}
