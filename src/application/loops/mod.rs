pub mod vault_loop;
