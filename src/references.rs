//! Cross-profile reference results
//!
//! Groups profile-annotated locations as profile -> files -> locations, the
//! shape shown by the references-in-profiles view.

use crate::lsp::LocationWithProfiles;
use crate::uri_codec::ClientUri;

pub struct ProfileReferences {
    locations: Vec<LocationWithProfiles>,
}

impl ProfileReferences {
    pub fn new(locations: Vec<LocationWithProfiles>) -> Self {
        Self { locations }
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn all(&self) -> &[LocationWithProfiles] {
        &self.locations
    }

    /// Every profile with at least one location, in first-seen order
    pub fn profiles(&self) -> Vec<&str> {
        let mut profiles: Vec<&str> = Vec::new();
        for location in &self.locations {
            for profile in &location.profiles {
                if !profiles.contains(&profile.as_str()) {
                    profiles.push(profile);
                }
            }
        }
        profiles
    }

    /// Distinct files referencing the symbol under `profile`
    pub fn files(&self, profile: &str) -> Vec<&ClientUri> {
        let mut files: Vec<&ClientUri> = Vec::new();
        for location in &self.locations {
            if in_profile(location, profile) && !files.contains(&&location.uri) {
                files.push(&location.uri);
            }
        }
        files
    }

    pub fn locations(&self, profile: &str, uri: &ClientUri) -> Vec<&LocationWithProfiles> {
        self.locations
            .iter()
            .filter(|location| in_profile(location, profile) && &location.uri == uri)
            .collect()
    }
}

fn in_profile(location: &LocationWithProfiles, profile: &str) -> bool {
    location.profiles.iter().any(|p| p == profile)
}

/// Display name of a file node: the last path segment
pub fn file_label(uri: &ClientUri) -> &str {
    uri.path.rsplit('/').next().unwrap_or(&uri.path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsp::{Position, Range};

    fn location(path: &str, line: u32, profiles: &[&str]) -> LocationWithProfiles {
        LocationWithProfiles {
            uri: ClientUri::new("sudu", "web", path),
            range: Range::new(Position::new(line, 0), Position::new(line, 4)),
            profiles: profiles.iter().map(|p| p.to_string()).collect(),
        }
    }

    fn sample() -> ProfileReferences {
        ProfileReferences::new(vec![
            location("/ws/src/a.cpp", 3, &["Debug", "Release"]),
            location("/ws/src/a.cpp", 9, &["Debug"]),
            location("/ws/src/b.h", 1, &["Release"]),
        ])
    }

    #[test]
    fn test_profiles_are_unique() {
        assert_eq!(sample().profiles(), vec!["Debug", "Release"]);
        assert!(ProfileReferences::new(vec![]).profiles().is_empty());
    }

    #[test]
    fn test_files_per_profile() {
        let refs = sample();
        let debug: Vec<String> = refs.files("Debug").iter().map(|u| u.to_string()).collect();
        assert_eq!(debug, vec!["sudu://web/ws/src/a.cpp"]);

        let release: Vec<&str> = refs.files("Release").into_iter().map(file_label).collect();
        assert_eq!(release, vec!["a.cpp", "b.h"]);
        assert!(refs.files("Profiling").is_empty());
    }

    #[test]
    fn test_results_outlive_profile_argument() {
        let refs = sample();
        let files = {
            let profile = String::from("Release");
            refs.files(&profile)
        };
        let locations = {
            let profile = String::from("Debug");
            refs.locations(&profile, files[0])
        };
        assert_eq!(files.len(), 2);
        assert_eq!(locations.len(), 2);
    }

    #[test]
    fn test_locations_per_file() {
        let refs = sample();
        let a = ClientUri::new("sudu", "web", "/ws/src/a.cpp");

        let lines: Vec<u32> = refs
            .locations("Debug", &a)
            .iter()
            .map(|l| l.range.start.line)
            .collect();
        assert_eq!(lines, vec![3, 9]);
        assert_eq!(refs.locations("Release", &a).len(), 1);
    }
}
