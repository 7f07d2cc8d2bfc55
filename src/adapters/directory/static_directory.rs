//! In-memory directory of sample groups. Every listing it returns is labelled
//! `ListingSource::Fallback`.

use crate::domain::{ChatRef, GroupListing, ListingSource};
use crate::ports::GroupDirectory;

pub struct StaticGroupDirectory {
    groups: Vec<GroupListing>,
}

fn sample(handle: &str, title: &str, members: u64, description: &str, initials: &str) -> GroupListing {
    GroupListing {
        chat: ChatRef::Handle(handle.to_string()),
        title: title.to_string(),
        member_count: Some(members),
        description: description.to_string(),
        avatar: Some(format!("https://placehold.co/64x64.png?text={}", initials)),
        source: ListingSource::Fallback,
    }
}

impl StaticGroupDirectory {
    pub fn new(groups: Vec<GroupListing>) -> Self {
        let groups = groups
            .into_iter()
            .map(|g| GroupListing {
                source: ListingSource::Fallback,
                ..g
            })
            .collect();
        Self { groups }
    }

    /// Built-in demo set shown when live search is unavailable.
    pub fn sample() -> Self {
        Self::new(vec![
            sample(
                "tech_innovators_forum",
                "Tech Innovators Forum",
                1203,
                "Discuss the latest in tech and innovation.",
                "TIF",
            ),
            sample(
                "startup_founders_hub",
                "Startup Founders Hub",
                875,
                "A community for startup founders to share ideas.",
                "SFH",
            ),
            sample(
                "nextjs_developers",
                "NextJS Developers",
                2450,
                "All things NextJS, React, and web development.",
                "NJD",
            ),
            sample(
                "remote_work_life",
                "Remote Work Life",
                560,
                "Tips and tricks for a successful remote career.",
                "RWL",
            ),
            sample(
                "ai_enthusiasts",
                "AI Enthusiasts Collective",
                1800,
                "Exploring the frontiers of Artificial Intelligence.",
                "AEC",
            ),
        ])
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl GroupDirectory for StaticGroupDirectory {
    fn search(&self, query: &str) -> Vec<GroupListing> {
        let needle = query.trim().trim_start_matches('@').to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.groups
            .iter()
            .filter(|g| {
                g.title.to_lowercase().contains(&needle)
                    || g.description.to_lowercase().contains(&needle)
                    || matches!(&g.chat, ChatRef::Handle(h) if h.contains(&needle))
            })
            .cloned()
            .collect()
    }

    fn find(&self, chat: &ChatRef) -> Option<GroupListing> {
        self.groups.iter().find(|g| &g.chat == chat).cloned()
    }

    fn all(&self) -> Vec<GroupListing> {
        self.groups.clone()
    }
}
