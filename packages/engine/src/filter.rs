//! Per-category visibility toggles.

use std::str::FromStr;

use movement_map_pin_models::PinCategory;

/// A category filter named a category that doesn't exist.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown category {name:?} (expected one of struggling, in-memory, supporter, story-sharer)")]
pub struct UnknownCategoryError {
    /// The name as given.
    pub name: String,
}

/// Which categories are shown. Every category starts visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterState {
    visible: [bool; PinCategory::COUNT],
}

impl Default for FilterState {
    fn default() -> Self {
        Self::all_visible()
    }
}

impl FilterState {
    /// Every category visible.
    #[must_use]
    pub const fn all_visible() -> Self {
        Self {
            visible: [true; PinCategory::COUNT],
        }
    }

    /// Only the given categories visible.
    #[must_use]
    pub fn only(categories: &[PinCategory]) -> Self {
        let mut filter = Self {
            visible: [false; PinCategory::COUNT],
        };
        for category in categories {
            filter.visible[category.index()] = true;
        }
        filter
    }

    /// Returns the state with `category` set to `visible`.
    #[must_use]
    pub const fn set(mut self, category: PinCategory, visible: bool) -> Self {
        self.visible[category.index()] = visible;
        self
    }

    /// Returns the state with `category` flipped.
    #[must_use]
    pub const fn toggle(self, category: PinCategory) -> Self {
        let visible = !self.is_visible(category);
        self.set(category, visible)
    }

    /// Whether pins of `category` are shown.
    #[must_use]
    pub const fn is_visible(&self, category: PinCategory) -> bool {
        self.visible[category.index()]
    }

    /// Whether every category is shown.
    #[must_use]
    pub fn shows_all(&self) -> bool {
        self.visible.iter().all(|v| *v)
    }

    /// Visible categories in legend order.
    pub fn visible_categories(&self) -> impl Iterator<Item = PinCategory> + '_ {
        PinCategory::all()
            .iter()
            .copied()
            .filter(|c| self.is_visible(*c))
    }

    /// Compact key for caching per-filter results. Bit `i` is set when the
    /// category with index `i` is visible.
    #[must_use]
    pub fn mask(&self) -> u8 {
        self.visible
            .iter()
            .enumerate()
            .filter(|(_, v)| **v)
            .fold(0, |mask, (i, _)| mask | (1 << i))
    }
}

impl FromStr for FilterState {
    type Err = UnknownCategoryError;

    /// Parses a comma-separated category list such as
    /// `"supporter,in-memory"`. A blank list means every category.
    fn from_str(list: &str) -> Result<Self, Self::Err> {
        let categories = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<PinCategory>().map_err(|_| UnknownCategoryError {
                    name: s.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(if categories.is_empty() {
            Self::all_visible()
        } else {
            Self::only(&categories)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_everything_visible() {
        let filter = FilterState::default();
        assert!(filter.shows_all());
        assert_eq!(filter.mask(), 0b1111);
        assert_eq!(filter.visible_categories().count(), PinCategory::COUNT);
    }

    #[test]
    fn set_and_toggle_are_pure() {
        let base = FilterState::default();
        let hidden = base.set(PinCategory::Supporter, false);

        assert!(base.is_visible(PinCategory::Supporter));
        assert!(!hidden.is_visible(PinCategory::Supporter));
        assert!(hidden.is_visible(PinCategory::InMemory));
        assert_eq!(hidden.toggle(PinCategory::Supporter), base);
        assert_ne!(hidden.mask(), base.mask());
    }

    #[test]
    fn parses_category_lists() {
        let filter: FilterState = "supporter, in_memory,".parse().unwrap();
        assert!(filter.is_visible(PinCategory::Supporter));
        assert!(filter.is_visible(PinCategory::InMemory));
        assert!(!filter.is_visible(PinCategory::Struggling));
        assert!(!filter.is_visible(PinCategory::StorySharer));
        assert_eq!(
            filter.visible_categories().collect::<Vec<_>>(),
            vec![PinCategory::InMemory, PinCategory::Supporter]
        );

        assert!("".parse::<FilterState>().unwrap().shows_all());
        assert!(" , ".parse::<FilterState>().unwrap().shows_all());
    }

    #[test]
    fn unknown_categories_are_rejected() {
        let err = "supporter,unicorn".parse::<FilterState>().unwrap_err();
        assert_eq!(err.name, "unicorn");
        assert!("unicorn".parse::<FilterState>().is_err());
    }
}
