pub mod agent_modules;
