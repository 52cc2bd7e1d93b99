use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Self::Admin),
            "teacher" => Some(Self::Teacher),
            "student" => Some(Self::Student),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Teacher => "teacher",
            Self::Student => "student",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the policy check: an explicit value, not a side effect on the
/// request. The reason is returned to the caller verbatim on deny.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub reason: String,
}

impl Decision {
    fn allow(reason: &str) -> Self {
        Self {
            allowed: true,
            reason: reason.to_string(),
        }
    }

    fn deny(reason: String) -> Self {
        Self {
            allowed: false,
            reason,
        }
    }
}

fn require(actor: Option<Role>, allowed_roles: &[Role], method: &str) -> Decision {
    let Some(role) = actor else {
        return Decision::deny(format!("{} requires an authenticated actor", method));
    };
    if allowed_roles.contains(&role) {
        return Decision::allow("role permitted");
    }
    let wanted = allowed_roles
        .iter()
        .map(|r| r.as_str())
        .collect::<Vec<_>>()
        .join(" or ");
    Decision::deny(format!("{} requires the {} role, actor is {}", method, wanted, role))
}

/// Evaluated by the router before any handler runs. Unknown methods pass
/// through so dispatch can answer not_implemented with no role attached.
pub fn authorize(actor: Option<Role>, method: &str) -> Decision {
    use Role::*;

    match method {
        // Open endpoints: process bring-up and the public signup form.
        "health" | "workspace.select" | "applications.create" => {
            Decision::allow("open endpoint")
        }

        // Any signed-in actor.
        "menu.get" | "settings.get" | "lessons.list" | "tests.detail" => {
            require(actor, &[Admin, Teacher, Student], method)
        }

        // A teacher working with their own group.
        "groups.mine" | "groups.removeStudent" => require(actor, &[Teacher], method),

        // Students sit tests; staff read the results.
        "attempts.submit" => require(actor, &[Student], method),
        "attempts.list" | "attempts.best" | "lessons.testSummary" => {
            require(actor, &[Admin, Teacher], method)
        }

        "settings.update" => require(actor, &[Admin], method),

        _ => {
            let family = method.split('.').next().unwrap_or(method);
            match family {
                // Administrative data entry.
                "teachers" | "students" | "applications" | "groups" | "subjects"
                | "lessons" | "tests" | "questions" | "answers" => {
                    require(actor, &[Admin], method)
                }
                _ => Decision::allow("no policy restriction"),
            }
        }
    }
}
