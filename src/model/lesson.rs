//! Course catalog model
//!
//! Lessons are authored elsewhere and are read-only from the learner's side.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single lesson in a course
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    /// Unique lesson identifier
    pub id: String,
    /// Slug of the course this lesson belongs to
    pub course_slug: String,
    /// Module number (1-indexed)
    pub module_number: u32,
    /// Position within the module, defines display order
    pub lesson_number: u32,
    /// Display title
    pub title: String,
    /// Short description
    #[serde(default)]
    pub description: String,
    /// Estimated duration in minutes
    #[serde(default)]
    pub duration_minutes: u32,
    /// Viewable without enrollment
    #[serde(default)]
    pub is_free_preview: bool,
    /// Reference to the hosted video, if the lesson has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_ref: Option<String>,
    /// Authored video length in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_duration_seconds: Option<u32>,
}

impl Lesson {
    /// Sort key used everywhere lessons are displayed
    pub fn order_key(&self) -> (u32, u32) {
        (self.module_number, self.lesson_number)
    }
}

/// Sort lessons by module number, then lesson number
pub fn sort_lessons(lessons: &mut [Lesson]) {
    lessons.sort_by_key(Lesson::order_key);
}

/// Group lessons by module number, each group in lesson order
pub fn group_by_module(lessons: &[Lesson]) -> BTreeMap<u32, Vec<&Lesson>> {
    let mut modules: BTreeMap<u32, Vec<&Lesson>> = BTreeMap::new();
    for lesson in lessons {
        modules.entry(lesson.module_number).or_default().push(lesson);
    }
    for group in modules.values_mut() {
        group.sort_by_key(|l| l.lesson_number);
    }
    modules
}

/// Turn a course slug into a readable title ("intro-to-rust" -> "Intro To Rust")
pub fn title_from_slug(slug: &str) -> String {
    slug.split(['-', '_'])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
pub(crate) fn lesson(id: &str, module: u32, number: u32) -> Lesson {
    Lesson {
        id: id.to_string(),
        course_slug: "course-x".to_string(),
        module_number: module,
        lesson_number: number,
        title: format!("Lesson {id}"),
        description: String::new(),
        duration_minutes: 10,
        is_free_preview: false,
        video_ref: None,
        video_duration_seconds: None,
    }
}
