//! Minimum export scale for large areas
//!
//! Large regions at fine resolution exceed what the compute service will
//! materialize, so the effective scale is raised to a floor based on the AOI
//! area and, for administrative regions, the admin level.

use crate::models::AreaOfInterest;

/// Floor by admin level: country, region/state, province/county
pub fn min_scale_for_level(level: u8) -> u32 {
    match level {
        0 => 250,
        1 => 90,
        _ => 30,
    }
}

pub fn min_scale_for_area(area_km2: f64) -> u32 {
    if area_km2 > 500_000.0 {
        500
    } else if area_km2 > 100_000.0 {
        250
    } else if area_km2 > 10_000.0 {
        90
    } else if area_km2 > 1_000.0 {
        30
    } else {
        10
    }
}

/// Scale actually used, and whether it differs from the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveScale {
    pub requested_m: u32,
    pub effective_m: u32,
}

impl EffectiveScale {
    pub fn adjusted(&self) -> bool {
        self.effective_m != self.requested_m
    }
}

pub fn effective_scale(requested_m: u32, aoi: &AreaOfInterest) -> EffectiveScale {
    let level_min = aoi.source().admin_level().map(min_scale_for_level).unwrap_or(0);
    let area_min = min_scale_for_area(aoi.area_km2());
    EffectiveScale {
        requested_m,
        effective_m: requested_m.max(level_min).max(area_min),
    }
}
