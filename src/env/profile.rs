// SPDX-License-Identifier: GPL-3.0-or-later

//! User profiles (`ve_env.h`'s `VeProfile`/`VeProfileModule`/
//! `VeProfileDatum`): per-user simulation settings, grouped into
//! named modules of string data.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::EnvironmentError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileModule {
    pub name: String,
    data: BTreeMap<String, String>,
}

impl ProfileModule {
    pub fn new(name: impl Into<String>) -> Self {
        ProfileModule { name: name.into(), data: BTreeMap::new() }
    }

    pub fn set_datum(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.data.insert(name.into(), value.into());
    }

    pub fn get_datum(&self, name: &str) -> Option<&str> {
        self.data.get(name).map(|s| s.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: String,
    pub fullname: Option<String>,
    pub stereo_eyedist: f64,
    pub modules: Vec<ProfileModule>,
}

impl UserProfile {
    pub fn new(name: impl Into<String>) -> Self {
        UserProfile { name: name.into(), fullname: None, stereo_eyedist: 0.0, modules: Vec::new() }
    }

    pub fn find_module(&self, name: &str) -> Option<&ProfileModule> {
        self.modules.iter().find(|m| m.name == name)
    }

    pub fn find_module_mut(&mut self, name: &str) -> Option<&mut ProfileModule> {
        self.modules.iter_mut().find(|m| m.name == name)
    }

    /// Finds the named module, creating it if it does not yet exist,
    /// then stores `name = value` in it. Mirrors `veProfileSetDatum`'s
    /// implicit module creation.
    pub fn set_datum(&mut self, module: &str, name: impl Into<String>, value: impl Into<String>) {
        if self.find_module_mut(module).is_none() {
            self.modules.push(ProfileModule::new(module));
        }
        self.find_module_mut(module).unwrap().set_datum(name, value);
    }

    pub fn to_toml(&self) -> Result<String, EnvironmentError> {
        toml::to_string_pretty(self).map_err(|e| EnvironmentError::Serialize(e.to_string()))
    }

    pub fn from_toml(text: &str) -> Result<Self, EnvironmentError> {
        toml::from_str(text).map_err(|e| EnvironmentError::Deserialize(e.to_string()))
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, EnvironmentError> {
        rmp_serde::to_vec(self).map_err(|e| EnvironmentError::Serialize(e.to_string()))
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, EnvironmentError> {
        rmp_serde::from_slice(bytes).map_err(|e| EnvironmentError::Deserialize(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_datum_creates_module_lazily() {
        let mut profile = UserProfile::new("alice");
        profile.set_datum("tracker", "offset", "0.05");
        let module = profile.find_module("tracker").unwrap();
        assert_eq!(module.get_datum("offset"), Some("0.05"));
    }

    #[test]
    fn toml_round_trip_preserves_modules() {
        let mut profile = UserProfile::new("bob");
        profile.fullname = Some("Bob Builder".to_string());
        profile.stereo_eyedist = 0.063;
        profile.set_datum("wand", "button_count", "3");

        let text = profile.to_toml().unwrap();
        let back = UserProfile::from_toml(&text).unwrap();
        assert_eq!(back, profile);
    }

    #[test]
    fn msgpack_round_trip_preserves_modules() {
        let mut profile = UserProfile::new("carol");
        profile.set_datum("hmd", "ipd", "0.064");
        let bytes = profile.to_msgpack().unwrap();
        let back = UserProfile::from_msgpack(&bytes).unwrap();
        assert_eq!(back, profile);
    }
}
