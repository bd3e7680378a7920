#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
    pub arg_key: &'static str,
}

pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "material",
        action: "set_material",
        arg_key: "material",
    },
    CommandSpec {
        command: "key",
        action: "set_key",
        arg_key: "key",
    },
    CommandSpec {
        command: "save",
        action: "save",
        arg_key: "id",
    },
];

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "open",
    action: "open_file",
    arg_key: "path",
}];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "generate",
        action: "generate",
        arg_key: "",
    },
    CommandSpec {
        command: "status",
        action: "status",
        arg_key: "",
    },
    CommandSpec {
        command: "history",
        action: "history",
        arg_key: "",
    },
    CommandSpec {
        command: "help",
        action: "help",
        arg_key: "",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
        arg_key: "",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
        arg_key: "",
    },
];

pub const SHELL_HELP_COMMANDS: &[&str] = &[
    "/open",
    "/material",
    "/generate",
    "/key",
    "/status",
    "/history",
    "/save",
    "/help",
    "/quit",
];
