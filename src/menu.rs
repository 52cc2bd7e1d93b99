use crate::auth::Role;
use serde::Serialize;

/// Navigation model handed to the presentation layer. Built per request from
/// the actor's role; nothing here is a process-wide constant.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuSection {
    pub title: String,
    pub items: Vec<MenuItem>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    pub title: String,
    pub route: String,
}

fn item(title: &str, route: &str) -> MenuItem {
    MenuItem {
        title: title.to_string(),
        route: route.to_string(),
    }
}

fn section(title: &str, items: Vec<MenuItem>) -> MenuSection {
    MenuSection {
        title: title.to_string(),
        items,
    }
}

pub fn menu_for_role(role: Role) -> Vec<MenuSection> {
    match role {
        Role::Admin => vec![
            section(
                "Users",
                vec![item("Teachers", "/teachers"), item("Students", "/students")],
            ),
            section("Applications", vec![item("Applications", "/applications")]),
            section("Groups", vec![item("Groups", "/groups")]),
            section("Subjects", vec![item("Subjects", "/subjects")]),
            section("Lessons", vec![item("Lessons", "/lessons")]),
            section("Tests", vec![item("Tests", "/tests")]),
        ],
        Role::Teacher => vec![
            section("My Group", vec![item("My Group", "/my-group")]),
            section("Subjects", vec![item("Subjects", "/subjects")]),
            section("Lessons", vec![item("Lessons", "/lessons")]),
            section("Tests", vec![item("Tests", "/tests")]),
        ],
        Role::Student => vec![section("Lessons", vec![item("Lessons", "/lessons")])],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_menu_covers_all_management_areas() {
        let menu = menu_for_role(Role::Admin);
        let titles: Vec<&str> = menu.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(
            titles,
            ["Users", "Applications", "Groups", "Subjects", "Lessons", "Tests"]
        );
        assert_eq!(menu[0].items.len(), 2);
    }

    #[test]
    fn teacher_menu_starts_with_their_group() {
        let menu = menu_for_role(Role::Teacher);
        assert_eq!(menu[0].title, "My Group");
        assert_eq!(menu[0].items[0].route, "/my-group");
    }

    #[test]
    fn student_menu_is_minimal() {
        let menu = menu_for_role(Role::Student);
        assert_eq!(menu.len(), 1);
    }
}
